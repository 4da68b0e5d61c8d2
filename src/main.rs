#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatdesk_lib::run().await
}
