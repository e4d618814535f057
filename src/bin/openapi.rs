//! Prints the generated OpenAPI document, for publishing alongside releases.

use anyhow::Result;

fn main() -> Result<()> {
    println!("{}", konto::api::openapi().to_pretty_json()?);
    Ok(())
}
