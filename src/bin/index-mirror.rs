#[tokio::main]
async fn main() -> index_mirror::Result<()> {
    index_mirror::cli::run().await
}
