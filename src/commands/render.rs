use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use crate::cli::{InputArgs, OutputArgs};
use crate::config;
use crate::domain::Kind;
use crate::infrastructure::TemplateRenderer;
use crate::services::{DeployService, RolloutOptions};

pub async fn execute(input: InputArgs, output: OutputArgs) -> Result<()> {
    let spec = config::load_spec(&input.spec, input.credentials.as_deref())
        .with_context(|| format!("Failed to load specification {}", input.spec.display()))?;
    let context = input.context.into_context();

    let service = DeployService::new(
        context,
        Box::new(TemplateRenderer::new(&output.templates_dir)),
    )
    .with_work_dir(&output.work_dir);
    let prepared = service.prepare(spec).await?;

    if prepared.spec.kind() == Kind::ConfigToFile {
        let written = service.write_config_files(&prepared)?;
        info!("{} Wrote {} config file(s)", "✅".green(), written.len());
        return Ok(());
    }

    info!("Templates: {}", prepared.templates.join(", "));
    let written = service.write_manifests(&prepared, &RolloutOptions::new(&output.output_dir))?;
    for path in [
        written.manifest,
        written.no_pdb_manifest,
        written.atomic_service,
    ]
    .into_iter()
    .flatten()
    {
        println!("{}", path.display());
    }
    if !prepared.has_templates() {
        info!("No manifests for action {}", prepared.spec.action());
    }
    Ok(())
}
