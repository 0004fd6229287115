use parkline_core::models::VehicleData;
use parkline_core::util::normalize_text_option;
use parkline_core::VehicleLookup;

use crate::cli::VehicleArgs;
use crate::commands::common::{
    core_error, format_record_lines, normalize_plate_arg, record_to_item, submit_and_report,
    Context,
};
use crate::error::CliError;

pub fn build_vehicle(args: VehicleArgs) -> Result<VehicleData, CliError> {
    Ok(VehicleData {
        plate: normalize_plate_arg(&args.plate)?,
        vehicle_type: args.vehicle_type.into(),
        owner_name: normalize_text_option(args.owner_name),
        owner_document: normalize_text_option(args.owner_document),
        status: None,
    })
}

pub async fn run_vehicle_register(args: VehicleArgs, ctx: &Context) -> Result<(), CliError> {
    let vehicle = build_vehicle(args)?;
    let engine = ctx.open_engine().await?;
    submit_and_report(&engine, &vehicle).await
}

pub async fn run_vehicle_search(plate: &str, as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let plate = normalize_plate_arg(plate)?;
    let engine = ctx.open_engine().await?;
    let lookup = engine.search_vehicle(&plate).await.map_err(core_error)?;

    match lookup {
        VehicleLookup::Remote(data) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("Found remotely:");
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        }
        VehicleLookup::Queued(record) => {
            if as_json {
                let item = record_to_item(&record, chrono::Utc::now().timestamp_millis());
                println!("{}", serde_json::to_string_pretty(&item)?);
            } else {
                println!("Found in local queue (not yet synced):");
                for line in format_record_lines(std::slice::from_ref(&record)) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}
