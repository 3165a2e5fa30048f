use clap::Parser;
use fork_scout::api::Error;
use fork_scout_app::Args;
use log::warn;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, reporting partial results");
        } else {
            futures::future::pending::<()>().await;
        }
    };
    let report = fork_scout_app::scout_until(args, ctrl_c).await?;

    println!("{}", report);

    Ok(())
}
