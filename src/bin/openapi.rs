use anyhow::Result;

fn main() -> Result<()> {
    let doc = step_ca_enroll::enroll::openapi();
    let json = serde_json::to_string_pretty(&doc)?;
    println!("{json}");
    Ok(())
}
