use anyhow::Result;
use semdiff_core::patterns::{Pattern, PatternSet};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PatternInfo {
    name: &'static str,
    description: &'static str,
    default: bool,
}

/// List the built-in patterns and whether each is enabled by default.
pub fn patterns_command(json: bool) -> Result<()> {
    let infos: Vec<PatternInfo> = Pattern::ALL
        .iter()
        .map(|p| PatternInfo {
            name: p.as_str(),
            description: p.description(),
            default: PatternSet::DEFAULT.contains(*p),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Patterns ('*' = enabled by default):");
    for info in infos {
        let marker = if info.default { "*" } else { " " };
        println!("  {marker} {:<18} {}", info.name, info.description);
    }
    Ok(())
}
