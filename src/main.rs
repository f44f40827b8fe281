use autocomplete_backend_rs::{app::App, jobs};
use tracing_subscriber::prelude::*;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let app = App::new().await;
    let _sweeper = jobs::monitor(app.context());

    app.serve().await;
}
