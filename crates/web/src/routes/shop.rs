//! Shop index page.

use std::sync::OnceLock;
use std::time::Instant;

use askama::Template;
use askama_web::WebTemplate;
use axum::response::IntoResponse;

/// Demo catalogue shown on the index page.
const DEMO_PRODUCTS: [(&str, u32); 3] = [("Laptop", 1999), ("Desktop", 2999), ("Smartphone", 999)];

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Shop index page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/index.html")]
pub struct ShopIndexTemplate {
    pub products: Vec<(&'static str, u32)>,
    /// Seconds since the first index render.
    pub time_running: String,
}

/// Display the shop index.
pub async fn index() -> impl IntoResponse {
    let started = STARTED.get_or_init(Instant::now);
    let products = DEMO_PRODUCTS.to_vec();

    tracing::debug!(?products, "Products for shop index");
    tracing::info!("Rendering shop index");

    ShopIndexTemplate {
        products,
        time_running: format!("{:.3}", started.elapsed().as_secs_f64()),
    }
}
