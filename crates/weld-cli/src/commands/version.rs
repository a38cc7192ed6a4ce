use miette::Result;
use serde::Serialize;

#[derive(Serialize)]
struct VersionJson {
    name: &'static str,
    version: &'static str,
}

pub fn run(json: bool) -> Result<()> {
    if json {
        let out = VersionJson {
            name: "weld",
            version: weld_core::VERSION,
        };
        println!("{}", serde_json::to_string(&out).unwrap_or_default());
    } else {
        println!("weld {}", weld_core::VERSION);
    }
    Ok(())
}
