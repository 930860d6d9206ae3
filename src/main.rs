use anyhow::Result;
use std::sync::Arc;
use std::path::Path;
use storybook_images::core::config::{Config, CONFIG_PATH};
use storybook_images::core::io::{NativeStorage, Storage};
use storybook_images::core::notify::LogNotifier;
use storybook_images::services::pipeline::StoryImagePipeline;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config, writing a template on first run
    if !Path::new(CONFIG_PATH).exists() {
        Config::default().save()?;
        println!(
            "Wrote a default {}. Add your illustration and hosting API keys, then run again.",
            CONFIG_PATH
        );
        return Ok(());
    }
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with illustration and hosting keys.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Wire the pipeline
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.storage_folder));
    let pipeline = StoryImagePipeline::from_config(&config, storage, Arc::new(LogNotifier))?;

    // 3. Stories named on the command line, or every stored story
    let args: Vec<String> = std::env::args().skip(1).collect();
    let ids = if args.is_empty() {
        pipeline.story_ids().await?
    } else {
        args
    };
    if ids.is_empty() {
        println!("No stories found in {}/stories", config.storage_folder);
        return Ok(());
    }

    // 4. Drafts get illustrated, finished stories get their links checked
    let mut illustrated = 0;
    let mut checked = 0;
    for id in &ids {
        let story = match pipeline.fetch_story(id).await {
            Ok(story) => story,
            Err(e) => {
                eprintln!("Skipping {}: {:#}", id, e);
                continue;
            }
        };
        if story.missing_images() {
            pipeline.process_story_images(story).await;
            illustrated += 1;
        } else {
            pipeline.repair_story(story).await;
            checked += 1;
        }
    }

    println!(
        "Done: {} stories illustrated, {} stories checked.",
        illustrated, checked
    );
    if !pipeline.agent().is_available() {
        println!("Illustration provider was unavailable; some pages use placeholder art.");
    }
    Ok(())
}
