//! Regenerating `keel.toml` source text from a manifest model.
//!
//! The emitted text is canonical: marker line first, sections in a fixed
//! order, empty and default fields omitted. Loading the generated text
//! yields a manifest equal to the input on every field, for every
//! supported schema version.

use crate::manifest::{
    next_major, next_minor, Condition, Dependency, LibraryLinkage, Localization, Manifest,
    Product, ProductKind, Resource, ResourceRule, Setting, Target, TargetDependency, TargetKind,
    VersionRequirement,
};
use crate::tools_version;

/// Generate manifest source text for a manifest.
///
/// Never fails for a manifest that passes validation; every expressible
/// field combination has exactly one textual form.
#[must_use]
pub fn generate(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str(&tools_version::marker_line(manifest.tools_version));
    out.push('\n');

    out.push_str("\n[package]\n");
    out.push_str(&format!("name = {}\n", toml_string(&manifest.name)));
    if let Some(localization) = &manifest.default_localization {
        out.push_str(&format!(
            "default-localization = {}\n",
            toml_string(localization)
        ));
    }
    if !manifest.language_versions.is_empty() {
        out.push_str(&format!(
            "language-versions = {}\n",
            string_array(&manifest.language_versions)
        ));
    }

    for platform in &manifest.platforms {
        out.push_str("\n[[platforms]]\n");
        out.push_str(&format!("name = {}\n", toml_string(&platform.name)));
        out.push_str(&format!("version = {}\n", toml_string(&platform.version)));
    }

    for dependency in &manifest.dependencies {
        out.push_str("\n[[dependencies]]\n");
        emit_dependency(&mut out, dependency);
    }

    for product in &manifest.products {
        out.push_str("\n[[products]]\n");
        emit_product(&mut out, product);
    }

    for target in &manifest.targets {
        emit_target(&mut out, target);
    }

    out
}

fn emit_dependency(out: &mut String, dependency: &Dependency) {
    match dependency {
        Dependency::Local { path, .. } => {
            out.push_str(&format!("path = {}\n", toml_string(path)));
        }
        Dependency::Remote {
            location,
            requirement,
            ..
        } => {
            out.push_str(&format!("url = {}\n", toml_string(location)));
            emit_requirement(out, requirement);
        }
    }
}

fn emit_requirement(out: &mut String, requirement: &VersionRequirement) {
    match requirement {
        VersionRequirement::Exact(version) => {
            out.push_str(&format!("exact = \"{version}\"\n"));
        }
        VersionRequirement::Range { lower, upper } => {
            if *upper == next_major(lower) {
                out.push_str(&format!("from = \"{lower}\"\n"));
            } else if *upper == next_minor(lower) {
                out.push_str(&format!("up-to-next-minor-from = \"{lower}\"\n"));
            } else {
                out.push_str(&format!(
                    "range = {{ lower = \"{lower}\", upper = \"{upper}\" }}\n"
                ));
            }
        }
        VersionRequirement::Branch(branch) => {
            out.push_str(&format!("branch = {}\n", toml_string(branch)));
        }
        VersionRequirement::Revision(revision) => {
            out.push_str(&format!("revision = {}\n", toml_string(revision)));
        }
    }
}

fn emit_product(out: &mut String, product: &Product) {
    out.push_str(&format!("name = {}\n", toml_string(&product.name)));
    match product.kind {
        ProductKind::Library(linkage) => {
            out.push_str("kind = \"library\"\n");
            match linkage {
                LibraryLinkage::Automatic => {}
                LibraryLinkage::Static => out.push_str("linkage = \"static\"\n"),
                LibraryLinkage::Dynamic => out.push_str("linkage = \"dynamic\"\n"),
            }
        }
        ProductKind::Executable => out.push_str("kind = \"executable\"\n"),
        ProductKind::Plugin => out.push_str("kind = \"plugin\"\n"),
    }
    if !product.targets.is_empty() {
        out.push_str(&format!("targets = {}\n", string_array(&product.targets)));
    }
}

fn emit_target(out: &mut String, target: &Target) {
    out.push_str("\n[[targets]]\n");
    out.push_str(&format!("name = {}\n", toml_string(&target.name)));
    match target.kind {
        TargetKind::Regular => {}
        TargetKind::Executable => out.push_str("kind = \"executable\"\n"),
        TargetKind::Test => out.push_str("kind = \"test\"\n"),
        TargetKind::Plugin => out.push_str("kind = \"plugin\"\n"),
    }
    if let Some(path) = &target.path {
        out.push_str(&format!("path = {}\n", toml_string(path)));
    }
    if !target.dependencies.is_empty() {
        let entries: Vec<String> = target
            .dependencies
            .iter()
            .map(target_dependency_value)
            .collect();
        out.push_str(&format!("dependencies = [{}]\n", entries.join(", ")));
    }

    for setting in &target.settings {
        out.push_str("\n[[targets.settings]]\n");
        emit_setting(out, setting);
    }

    for resource in &target.resources {
        out.push_str("\n[[targets.resources]]\n");
        emit_resource(out, resource);
    }
}

fn target_dependency_value(dependency: &TargetDependency) -> String {
    match dependency {
        TargetDependency::Named {
            name,
            condition: None,
        } => toml_string(name),
        TargetDependency::Named {
            name,
            condition: Some(condition),
        } => format!(
            "{{ name = {}, condition = {} }}",
            toml_string(name),
            condition_value(condition)
        ),
        TargetDependency::Target { name, condition } => match condition {
            None => format!("{{ target = {} }}", toml_string(name)),
            Some(condition) => format!(
                "{{ target = {}, condition = {} }}",
                toml_string(name),
                condition_value(condition)
            ),
        },
        TargetDependency::Product {
            name,
            package,
            condition,
        } => {
            let mut fields = vec![format!("product = {}", toml_string(name))];
            if let Some(package) = package {
                fields.push(format!("package = {}", toml_string(package)));
            }
            if let Some(condition) = condition {
                fields.push(format!("condition = {}", condition_value(condition)));
            }
            format!("{{ {} }}", fields.join(", "))
        }
    }
}

fn emit_setting(out: &mut String, setting: &Setting) {
    match setting {
        Setting::HeaderSearchPath { path, condition } => {
            out.push_str(&format!("header-search-path = {}\n", toml_string(path)));
            emit_condition_line(out, condition.as_ref());
        }
        Setting::Define {
            name,
            value,
            condition,
        } => {
            match value {
                None => out.push_str(&format!("define = {}\n", toml_string(name))),
                Some(value) => out.push_str(&format!(
                    "define = {{ name = {}, value = {} }}\n",
                    toml_string(name),
                    toml_string(value)
                )),
            }
            emit_condition_line(out, condition.as_ref());
        }
        Setting::LinkedLibrary { name, condition } => {
            out.push_str(&format!("linked-library = {}\n", toml_string(name)));
            emit_condition_line(out, condition.as_ref());
        }
    }
}

fn emit_condition_line(out: &mut String, condition: Option<&Condition>) {
    if let Some(condition) = condition {
        out.push_str(&format!("condition = {}\n", condition_value(condition)));
    }
}

fn condition_value(condition: &Condition) -> String {
    let mut fields = Vec::new();
    if !condition.platforms.is_empty() {
        fields.push(format!("platforms = {}", string_array(&condition.platforms)));
    }
    if let Some(configuration) = condition.configuration {
        fields.push(format!(
            "configuration = {}",
            toml_string(configuration.as_str())
        ));
    }
    format!("{{ {} }}", fields.join(", "))
}

fn emit_resource(out: &mut String, resource: &Resource) {
    let rule = match resource.rule {
        ResourceRule::Copy => "copy",
        ResourceRule::Process => "process",
    };
    out.push_str(&format!("rule = \"{rule}\"\n"));
    out.push_str(&format!("path = {}\n", toml_string(&resource.path)));
    if let Some(localization) = resource.localization {
        let localization = match localization {
            Localization::Default => "default",
            Localization::Base => "base",
        };
        out.push_str(&format!("localization = \"{localization}\"\n"));
    }
}

fn string_array(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| toml_string(v)).collect();
    format!("[{}]", quoted.join(", "))
}

fn toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
