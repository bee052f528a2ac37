//! Unit tests for cron schedule helpers

use backup_manager::utils::cron::{next_run, validate_cron_schedule};
use chrono::Utc;
use rstest::rstest;

#[rstest]
#[case("0 2 * * *", true)]
#[case("*/15 * * * *", true)]
#[case("0 3 * * 1-5", true)]
#[case("30 4 1 */2 *", true)]
#[case("", false)]
#[case("@daily", false)]
#[case("0 25 * * *", false)]
#[case("0 0 0 2 * *", false)]
fn test_schedules(#[case] schedule: &str, #[case] valid: bool) {
    assert_eq!(validate_cron_schedule(schedule), valid, "{}", schedule);
}

#[test]
fn test_next_run_is_in_the_future() {
    let next = next_run("*/5 * * * *").unwrap();
    let now = Utc::now();
    assert!(next > now);
    assert!(next - now <= chrono::Duration::minutes(5));
    assert!(next_run("not a schedule").is_none());
}
