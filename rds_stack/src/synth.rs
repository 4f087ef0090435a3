//! Template synthesis
//!
//! Writes one template per environment plus a manifest describing where each
//! stack is deployed, the way `cdk synth` fills `cdk.out`.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Environments;
use crate::error::{Error, Result};
use crate::package::FunctionPackage;
use crate::stack::{DatabaseStack, CODE_KEY_PARAMETER};
use crate::template::Template;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Deployment target of one synthesized stack
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ManifestEntry {
    pub environment: String,
    pub region: String,
    pub account: String,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrator_code: Option<FunctionPackage>,
}

/// Result of synthesizing one environment
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub stack_name: String,
    pub template_path: PathBuf,
}

/// Synthesize the selected environments (all when `selected` is empty)
pub fn synthesize(
    environments: &Environments,
    selected: &[String],
    out_dir: &Path,
) -> Result<Vec<SynthesizedStack>> {
    synthesize_with_package(environments, selected, out_dir, None)
}

/// Synthesize and point each migration function at a packaged archive
///
/// The code key parameter defaults to the archive's key and the function
/// carries `aws:asset:*` metadata naming the archive, as CDK assets do.
pub fn synthesize_with_package(
    environments: &Environments,
    selected: &[String],
    out_dir: &Path,
    package: Option<&FunctionPackage>,
) -> Result<Vec<SynthesizedStack>> {
    // Resolve every name first so an unknown one writes nothing
    let targets: Vec<(&str, _)> = if selected.is_empty() {
        environments.iter().collect()
    } else {
        selected
            .iter()
            .map(|name| environments.get(name).map(|config| (name.as_str(), config)))
            .collect::<Result<_>>()?
    };

    fs::create_dir_all(out_dir)?;

    let mut manifest = IndexMap::new();
    let mut synthesized = Vec::new();

    for (name, config) in targets {
        let stack = DatabaseStack::build(name, config)?;
        let mut template = stack.to_template()?;
        if let Some(package) = package {
            attach_package(&mut template, &stack, package)?;
        }

        let file_name = format!("{}.template.json", config.stack_name);
        let template_path = out_dir.join(&file_name);
        fs::write(&template_path, template.to_json_pretty()?)?;

        info!(
            environment = name,
            stack = %config.stack_name,
            path = %template_path.display(),
            resources = template.resources.len(),
            "Synthesized stack"
        );

        manifest.insert(
            config.stack_name.clone(),
            ManifestEntry {
                environment: name.to_string(),
                region: config.region.clone(),
                account: config.account_id.clone(),
                template: file_name,
                migrator_code: package.cloned(),
            },
        );
        synthesized.push(SynthesizedStack {
            stack_name: config.stack_name.clone(),
            template_path,
        });
    }

    fs::write(
        out_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    Ok(synthesized)
}

fn attach_package(
    template: &mut Template,
    stack: &DatabaseStack,
    package: &FunctionPackage,
) -> Result<()> {
    let parameter = template.parameters.get_mut(CODE_KEY_PARAMETER).ok_or_else(|| {
        Error::ValidationError(format!("template has no {} parameter", CODE_KEY_PARAMETER))
    })?;
    *parameter = parameter.clone().with_default(package.s3_key.clone());

    let function_id = &stack.migrator.function.logical_id;
    let function = template.resources.get_mut(function_id).ok_or_else(|| {
        Error::ValidationError(format!("template has no {} resource", function_id))
    })?;
    *function = function.clone().metadata(json!({
        "aws:asset:path": package.file,
        "aws:asset:property": "Code",
    }));
    Ok(())
}
