use chrono::Utc;
use statfill::{
    backfill_config_from_env, init_logging, load_readings_csv, log_app_start,
    logging_config_from_env, purge_meter, sync_meter, BackfillPlan, SeriesId, SyncRequest,
};
use tracing::{error, info};

const COMPONENT: &str = "stat_backfill";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(COMPONENT, &logging);

    if let Err(err) = run() {
        error!(component = COMPONENT, event = "app.failed", error = %err);
        return Err(err);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = backfill_config_from_env()?;
    // Remote mode needs an HTTP bridge in front of the recorder websocket.
    let mut store = config.store.open(COMPONENT)?;

    if config.purge {
        let cleared = purge_meter(store.as_mut(), &config.meter_id, config.direction)?;
        info!(
            component = COMPONENT,
            event = "app.finish",
            mode = "purge",
            cleared = cleared.len()
        );
        return Ok(());
    }

    let calendar = config.calendar();
    let readings = load_readings_csv(config.readings_path()?, &calendar)?;
    let request = SyncRequest {
        plan: BackfillPlan {
            energy: SeriesId::energy(config.meter_id.as_str(), config.direction),
            calendar,
            cost: config.cost.clone(),
        },
        readings: &readings,
        start_day: config.start_date,
        today: calendar.today(Utc::now()),
    };

    let report = sync_meter(store.as_mut(), &request)?;
    let points_written =
        report.backfill.points_written + report.initial_points + report.tail_points;
    info!(
        component = COMPONENT,
        event = "app.finish",
        mode = "sync",
        energy_created = report.energy_created,
        cost_created = report.cost_created,
        holes_found = report.backfill.holes_found,
        holes_filled = report.backfill.holes_filled,
        holes_skipped = report.backfill.holes_skipped,
        points_written,
        adjustments = report.backfill.adjustments
    );
    Ok(())
}
