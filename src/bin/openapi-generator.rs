//! Print the OpenAPI document of the client's HTTP interface.

use utoipa::OpenApi;
use word_relay::services::documentation::ApiDoc;

fn main() -> anyhow::Result<()> {
    let doc = ApiDoc::openapi();
    println!("{}", doc.to_pretty_json()?);
    Ok(())
}
