mod access;
mod app;
mod error;
mod gateway;
mod notify;
mod router;
mod routing;
mod store;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
