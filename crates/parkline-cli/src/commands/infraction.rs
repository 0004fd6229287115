use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use parkline_core::gateway::Photo;
use parkline_core::models::InfractionData;
use parkline_core::util::normalize_text_option;

use crate::cli::InfractionArgs;
use crate::commands::common::{
    core_error, guess_mime_type, normalize_plate_arg, submit_and_report, Context,
};
use crate::error::CliError;

pub fn build_infraction(args: InfractionArgs) -> Result<InfractionData, CliError> {
    let start_datetime = match normalize_text_option(args.start) {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|_| CliError::InvalidTimestamp(raw.clone()))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    Ok(InfractionData {
        plate: normalize_plate_arg(&args.plate)?,
        agent_id: args.agent,
        zone_id: args.zone,
        infraction_type: args.infraction_type.into(),
        start_datetime: start_datetime.to_rfc3339_opts(SecondsFormat::Secs, true),
        location_lat: args.lat,
        location_lng: args.lng,
        observations: normalize_text_option(args.observations),
        photo_urls: args
            .photo_urls
            .into_iter()
            .filter_map(|url| normalize_text_option(Some(url)))
            .collect(),
    })
}

pub async fn run_infraction_create(args: InfractionArgs, ctx: &Context) -> Result<(), CliError> {
    let infraction = build_infraction(args)?;
    let engine = ctx.open_engine().await?;
    submit_and_report(&engine, &infraction).await
}

pub fn read_photos(files: &[PathBuf]) -> Result<Vec<Photo>, CliError> {
    files
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).map_err(|source| CliError::PhotoRead {
                path: path.display().to_string(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map_or_else(|| "photo".to_string(), |name| name.to_string_lossy().into_owned());
            Ok(Photo::new(file_name, guess_mime_type(path), bytes))
        })
        .collect()
}

pub async fn run_infraction_photos(
    infraction_id: u64,
    files: &[PathBuf],
    ctx: &Context,
) -> Result<(), CliError> {
    let photos = read_photos(files)?;
    let engine = ctx.open_engine().await?;
    let urls = engine
        .upload_infraction_photos(infraction_id, photos)
        .await
        .map_err(core_error)?;

    println!("Uploaded {} photo(s) to infraction {infraction_id}", urls.len());
    for url in urls {
        println!("  {url}");
    }
    Ok(())
}
