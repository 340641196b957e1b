use crate::output::UserOutput;
use director::docker::ContainerDriver;
use director::state::{ConfigStore, JsonConfigStore};
use director::{Director, ImageCatalog, Settings};

pub fn run_images(settings: &Settings, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let mut catalog = ImageCatalog::new(&settings.images_dir, settings.base_image.clone());
    catalog.load()?;
    let images = catalog.list();

    if json {
        out.status(&serde_json::to_string_pretty(&images)?);
        return Ok(());
    }

    out.status(&format!("Images in {}:", catalog.root().display()));
    out.status(&format!("{:-<50}", ""));
    if images.is_empty() {
        out.status("  No images found");
    }
    for image in images {
        out.status(&format!(
            "  {:<24} {:<12} {}",
            image.name,
            format!("{:?}", image.category).to_lowercase(),
            image.path.display()
        ));
    }
    Ok(())
}

pub fn run_configs(settings: &Settings, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let store = JsonConfigStore::new(settings.resolved_config_dir());
    let configs = store.load_all()?;

    if json {
        out.status(&serde_json::to_string_pretty(&configs)?);
        return Ok(());
    }

    out.status(&format!("Configs in {}:", store.dir().display()));
    out.status(&format!("{:-<50}", ""));
    if configs.is_empty() {
        out.status("  No saved configurations");
    }
    for (name, config) in configs {
        let pos = config
            .pos
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let env = config.build_options.env.unwrap_or_default().join(" ");
        out.status(&format!("  {:<24} pos={:<6} {}", name, pos, env));
    }
    Ok(())
}

pub async fn run_containers(
    settings: Settings,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let director = Director::builder().settings(settings).build()?;
    let driver: &ContainerDriver = director.driver();
    let containers = driver.list_managed().await?;
    driver.close().await;

    if json {
        out.status(&serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }

    out.status("Managed containers:");
    out.status(&format!("{:-<50}", ""));
    if containers.is_empty() {
        out.status("  No managed containers");
    }
    for container in containers {
        let icon = if container.running { "+" } else { "o" };
        let ports = container
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.status(&format!(
            "  {} {:<24} {:<10} {}",
            icon, container.name, container.state, ports
        ));
    }
    Ok(())
}
