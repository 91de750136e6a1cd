#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    horizon_node::init().await
}
