use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{error, info, warn};

use crate::cli::InputArgs;
use crate::config;
use crate::domain::resolve;

pub fn execute(input: InputArgs) -> Result<()> {
    let spec = config::load_spec(&input.spec, input.credentials.as_deref())
        .with_context(|| format!("Failed to load specification {}", input.spec.display()))?;
    let context = input.context.into_context();

    let resolution = resolve(spec, &context);
    for warning in &resolution.warnings {
        warn!("⚠️  {}", warning);
    }
    for message in &resolution.errors {
        error!("❌ {}", message);
    }

    let (spec, _) = resolution.into_result()?;
    info!(
        "{} {} is valid ({} / {} / {})",
        "✅".green(),
        spec.app.bold(),
        spec.kind(),
        spec.action(),
        spec.visibility()
    );
    Ok(())
}
