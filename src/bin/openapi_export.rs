use std::{fs, path::PathBuf};

use clap::Parser;
use storefront_api::openapi::ApiDocV1;
use utoipa::OpenApi;

#[derive(Parser, Debug)]
#[command(name = "openapi-export", about = "Write the v1 OpenAPI document as JSON")]
struct Args {
    /// Output file
    #[arg(short, long, default_value = "openapi/storefront-api.v1.json")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let json = serde_json::to_string_pretty(&ApiDocV1::openapi())?;

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&args.output, json)?;

    println!("OpenAPI spec written to {}", args.output.display());
    Ok(())
}
