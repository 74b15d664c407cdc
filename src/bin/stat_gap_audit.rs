use chrono::Utc;
use statfill::{
    backfill_config_from_env, init_logging, log_app_start, logging_config_from_env, GapScanner,
    SeriesId, StatisticType,
};

const COMPONENT: &str = "stat_gap_audit";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(COMPONENT, &logging);

    let config = backfill_config_from_env()?;
    let calendar = config.calendar();
    let today = calendar.today(Utc::now());
    // Remote mode needs an HTTP bridge in front of the recorder websocket.
    let mut store = config.store.open(COMPONENT)?;

    let energy_id = SeriesId::energy(config.meter_id.as_str(), config.direction).statistic_id();
    let cost_id = SeriesId::cost(config.meter_id.as_str(), config.direction).statistic_id();
    let known = store.list_statistic_ids(StatisticType::Sum)?;
    if !known.contains(&energy_id) {
        println!("{energy_id}: not present in the store, nothing to audit.");
        return Ok(());
    }
    let cost_id = known.contains(&cost_id).then_some(cost_id);

    let Some(scanner) = GapScanner::anchored(
        store.as_mut(),
        &energy_id,
        cost_id,
        calendar,
        config.start_date,
        today,
    )?
    else {
        println!("{energy_id}: no points inside the lookback horizon.");
        return Ok(());
    };

    println!(
        "Auditing {} from {} to {} (exclusive), timezone {}",
        energy_id,
        scanner.cursor(),
        today,
        calendar.tz()
    );

    let mut holes = 0u64;
    let mut missing_days = 0i64;
    for hole in scanner.holes(store.as_mut()) {
        let hole = hole?;
        holes += 1;
        missing_days += hole.days();
        let last_cost = hole
            .last_cost
            .map(|cost| format!("{cost:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  hole {} -> {} | days={} last_sum={:.3} last_cost={}",
            hole.from_day,
            hole.to_day,
            hole.days(),
            hole.last_sum,
            last_cost
        );
    }

    if holes == 0 {
        println!("\nRESULT: no gaps detected in audited range.");
        Ok(())
    } else {
        Err(format!("gaps detected: holes={holes} missing_days={missing_days}").into())
    }
}
