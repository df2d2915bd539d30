//! Validate a template descriptor.

use std::collections::HashSet;
use std::path::PathBuf;

use reelsmith_template_model::TemplateDescriptor;

pub fn run(descriptor: PathBuf) -> anyhow::Result<()> {
    println!("Validating descriptor: {}", descriptor.display());

    let desc = TemplateDescriptor::from_path(&descriptor)
        .map_err(|e| anyhow::anyhow!("Failed to load descriptor: {e}"))?;

    let mut issues = Vec::new();

    let mut seen = HashSet::new();
    for section in &desc.sections {
        if !seen.insert(section.name.as_str()) {
            issues.push(format!("duplicate section name: {}", section.name));
        }
    }

    for section in desc.video_sections() {
        if section.kind != "project_video" && section.options.duration.is_none() {
            issues.push(format!(
                "section {} has no duration and is not probed",
                section.name
            ));
        }
    }

    for clip in &desc.audios {
        if !clip.options.is_consistent() {
            issues.push(format!(
                "audio clip {}: end != start + duration",
                clip.name
            ));
        }
        if clip.url.is_none() && clip.path.is_none() {
            issues.push(format!("audio clip {} has neither url nor path", clip.name));
        }
    }

    for overlay in &desc.overlays {
        let o = &overlay.options;
        if o.x < 0.0 || o.y < 0.0 || o.width <= 0.0 || o.height <= 0.0 || o.blur_strength <= 0.0 {
            issues.push(format!("overlay {} has invalid geometry", overlay.name));
        }
    }

    println!("  Sections: {} ({} video)", desc.sections.len(), desc.video_sections().count());
    println!("  Audio clips: {}", desc.audios.len());
    println!("  Overlays: {}", desc.overlays.len());

    if issues.is_empty() {
        println!("\nDescriptor is valid.");
        Ok(())
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        anyhow::bail!("{} issue(s) found", issues.len())
    }
}
