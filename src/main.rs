use std::{env, sync::Arc, time::Instant};

use clap::Parser;
use color_eyre::Result;
use log::info;

use gofile_upload::cloud_storage::{GofileSettings, GofileStorage};
use gofile_upload::cloud_storage::path_conversions::normalize_path;
use gofile_upload::domain::ServerDirectory;
use gofile_upload::uploader::history::open_run;
use gofile_upload::uploader::report::report;
use gofile_upload::uploader::{UploadRequest, Uploader};
use gofile_upload::utils::config::config_file_path;
use gofile_upload::utils::logger::init_logger;
use gofile_upload::{Cli, UploaderError};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logger(cli.log_level.filter(), cli.log_file.as_deref())?;

    let now = Instant::now();
    let (config, history) = open_run(config_file_path(), cli.overrides(), cli.use_config_explicit())
        .await
        .map_err(UploaderError::from)?;

    let request = UploadRequest {
        path: cli.file.clone(),
        folder: cli.folder.clone(),
        dry_run: cli.dry_run,
    };
    info!(
        "gofile-upload started for: {} folder: {}",
        normalize_path(&request.path),
        request.folder.as_deref().unwrap_or("(default)")
    );

    let mut uploader = Uploader::new(config.clone(), history);
    let candidates = uploader.discover(&request).await?;
    // connect only once there is something to upload
    if !request.dry_run && !candidates.is_empty() {
        let storage = GofileStorage::connect(GofileSettings::new(
            config.token.clone(),
            config.website_token.clone(),
        ))
        .await
        .map_err(UploaderError::from)?;
        if config.token.is_none() {
            info!("Created a guest account, token: {}", storage.token());
        }
        info!(
            "Connected as account {} ({})",
            storage.account_id(),
            if storage.is_premium() { "premium" } else { "standard" }
        );
        uploader = uploader.with_directory(Arc::new(storage));
    }

    let run = uploader.upload(&request, candidates).await?;
    report(&run.results, &run.summary, config.save, &env::current_dir()?).map_err(UploaderError::from)?;
    if let Some(reason) = run.auth_failure {
        return Err(UploaderError::Authentication(reason).into());
    }

    info!(
        "gofile-upload finished for: {} elapsed: {:.2?}",
        normalize_path(&request.path),
        now.elapsed()
    );
    Ok(())
}
