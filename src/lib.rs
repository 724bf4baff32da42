pub mod config;
pub mod error;
pub mod pipeline;

pub mod data {
    pub mod index;
    pub mod loader;
    pub mod columnar;
}

pub mod metrics {
    pub mod schema;
    pub mod aggregate;
}

pub mod plot {
    pub mod plot_html;
}
