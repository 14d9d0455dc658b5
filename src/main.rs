use anyhow::Result;
use comic4cut::core::config::Config;
use comic4cut::core::io::{FolderSink, NativeStorage, Storage};
use comic4cut::services::llm::create_generators;
use comic4cut::services::setup;
use comic4cut::services::workflow::ComicWizard;
use comic4cut::utils::caption::CaptionRenderer;
use comic4cut::utils::image::Compositor;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check 'config.yml'.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // Prompts for the API key when neither config.yml nor the environment has one.
    setup::run_setup(&mut config)?;

    let generators = create_generators(&config)?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let captions = CaptionRenderer::new(config.fonts_dir.as_deref().map(Path::new));
    let compositor = Compositor::new(captions, storage.clone());
    let wizard = ComicWizard::new(generators, compositor, config.generation.clone());
    let sink = FolderSink::new(config.output_folder.clone(), storage);

    setup::run_session(&wizard, &sink).await?;
    Ok(())
}
