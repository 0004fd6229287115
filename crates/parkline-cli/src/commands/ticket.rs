use parkline_core::models::TicketData;

use crate::cli::TicketArgs;
use crate::commands::common::{normalize_plate_arg, submit_and_report, Context};
use crate::error::CliError;

pub fn build_ticket(args: TicketArgs) -> Result<TicketData, CliError> {
    Ok(TicketData {
        plate: normalize_plate_arg(&args.plate)?,
        zone_id: args.zone,
        duration: args.duration,
        payment_method: args.payment.into(),
        amount: args.amount,
    })
}

pub async fn run_ticket_create(args: TicketArgs, ctx: &Context) -> Result<(), CliError> {
    let ticket = build_ticket(args)?;
    let engine = ctx.open_engine().await?;
    submit_and_report(&engine, &ticket).await
}
