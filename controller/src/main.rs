mod api;
mod display;
mod history;
mod host;
mod mqtt;
mod price_feed;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
