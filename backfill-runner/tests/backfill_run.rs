//! End-to-end backfill runs against a temporary workspace.
//!
//! Tests:
//! 1. Config file → iterators → coordinator → file executor → history
//! 2. Versioned query files and temp targets
//! 3. Resume planning from a partially written history
//! 4. Resume keeps iterators of the same kind apart
//! 5. Fiscal iterators fed from a CSV calendar

use std::fs;
use std::path::Path;

use backfill_core::{Direction, PeriodKind, RoundCoordinator};
use backfill_runner::{
    BackfillConfig, BackfillRunner, DryRunExecutor, FileExecutor, QueryTarget, ResumePlan,
    RunError, RunHistory,
};
use chrono::NaiveDate;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn write(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

const CONFIG: &str = r#"
[backfill]
start_date = "2023-03-15"
direction = "backward"
complete_periods = true
script_version = "v2"

[params]
tmp_env = "scratch"

[[iterators]]
kind = "calendar_month"
iterations = 2
padding = [0, 0]

[[queries]]
file = "monthly/usage"
temp = true

[[queries]]
name = "churn"
sql = "insert overwrite table churn partition (ym='{year_month}') select * from {tmp_env}.usage"

[runner]
history = "state/history.jsonl"
"#;

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("backfill.toml"), CONFIG);
    write(
        &dir.path().join("hql/monthly/usage-v2.hql"),
        "select * from events where dt between '{start_date}' and '{end_date}'",
    );
    dir
}

#[test]
fn config_to_files_and_history() {
    let dir = workspace();
    let config = BackfillConfig::from_file(&dir.path().join("backfill.toml")).unwrap();
    let run_id = config.run_id().unwrap();

    let version = config.script_version(None);
    let queries = config.load_queries(version.as_deref()).unwrap();
    assert_eq!(queries[0].table_name(), "usage");
    assert!(queries[0].temp());
    assert!(!queries[1].temp());

    let iterators = config.build_iterators(d(2030, 1, 1), None).unwrap();
    let mut coordinator = RoundCoordinator::new(iterators).unwrap();

    let history = RunHistory::new(config.history_path().unwrap());
    let out = dir.path().join("out");
    let mut runner =
        BackfillRunner::new(queries, FileExecutor::new(&out)).with_history(history.clone(), run_id.clone());

    let mut params = config.params.clone();
    let summary = runner.run(&mut params, &mut coordinator).unwrap();
    assert_eq!(summary.advances, vec![2]);
    assert_eq!(runner.executed(), 4);

    // Mid-March start with complete periods: February, then January.
    let feb = fs::read_to_string(out.join("usage/2023-02-01_2023-02-28.sql")).unwrap();
    assert_eq!(
        feb,
        "-- target: scratch.usage\nselect * from events where dt between '2023-02-01' and '2023-02-28'\n"
    );
    let jan = fs::read_to_string(out.join("churn/2023-01-01_2023-01-31.sql")).unwrap();
    assert!(jan.contains("partition (ym='2023-01')"));
    assert!(jan.contains("from scratch.usage"));

    let entries = history.read_run(&run_id).unwrap();
    let tables: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.table.as_str(), e.year_month.as_str()))
        .collect();
    assert_eq!(
        tables,
        vec![
            ("usage", "2023-02"),
            ("churn", "2023-02"),
            ("usage", "2023-01"),
            ("churn", "2023-01"),
        ]
    );
    assert!(entries.iter().all(|e| e.statement_hash.len() == 64));
}

#[test]
fn missing_versioned_query_file_fails_to_load() {
    let dir = workspace();
    let config = BackfillConfig::from_file(&dir.path().join("backfill.toml")).unwrap();
    let err = config.load_queries(Some("v3")).unwrap_err();
    assert!(err.to_string().contains("usage-v3.hql"));
}

#[test]
fn resume_after_interrupted_run() {
    let dir = workspace();
    let mut config = BackfillConfig::from_file(&dir.path().join("backfill.toml")).unwrap();
    config.iterators[0].iterations = 6;
    let run_id = config.run_id().unwrap();
    let queries = config.load_queries(Some("v2")).unwrap();
    let history = RunHistory::new(config.history_path().unwrap());

    // Executor that dies on the third period.
    struct Flaky {
        inner: DryRunExecutor,
        remaining: usize,
    }
    impl backfill_runner::QueryExecutor for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn execute(
            &mut self,
            statement: &backfill_runner::Statement,
        ) -> Result<(), backfill_runner::ExecutorError> {
            if self.remaining == 0 {
                return Err(backfill_runner::ExecutorError::Failed {
                    table: statement.table.clone(),
                    reason: "cluster lost".into(),
                });
            }
            self.remaining -= 1;
            self.inner.execute(statement)
        }
    }

    let flaky = Flaky {
        inner: DryRunExecutor::new(),
        remaining: 5,
    };
    let mut runner = BackfillRunner::new(queries, flaky).with_history(history.clone(), run_id.clone());
    let mut coordinator =
        RoundCoordinator::new(config.build_iterators(d(2030, 1, 1), None).unwrap()).unwrap();
    let err = runner
        .run(&mut config.params.clone(), &mut coordinator)
        .unwrap_err();
    assert!(matches!(err, RunError::Executor(_)));

    // Feb and Jan finished both queries; December only finished `usage`.
    let entries = history.read_all().unwrap();
    assert_eq!(entries.len(), 5);
    let plan = ResumePlan::from_history(
        &entries,
        &run_id,
        0,
        PeriodKind::CalendarMonth,
        Direction::Backward,
        "churn",
        6,
    )
    .unwrap();
    assert_eq!(plan.completed, 2);
    assert_eq!(plan.remaining, 4);
    assert_eq!(plan.next_start, d(2022, 12, 1));
}

#[test]
fn resume_tracks_each_same_kind_iterator() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("backfill.toml"),
        r#"
[backfill]
start_date = "2023-06-01"
direction = "backward"

[[iterators]]
kind = "calendar_month"
iterations = 2

[[iterators]]
kind = "calendar_month"
iterations = 2
start_date = "2022-12-01"

[[queries]]
name = "usage"
sql = "select '{start_date}'"

[runner]
history = "history.jsonl"
"#,
    );
    let config = BackfillConfig::from_file(&dir.path().join("backfill.toml")).unwrap();
    let run_id = config.run_id().unwrap();
    let history = RunHistory::new(config.history_path().unwrap());
    let mut runner = BackfillRunner::new(config.load_queries(None).unwrap(), DryRunExecutor::new())
        .with_history(history.clone(), run_id.clone());
    let mut coordinator =
        RoundCoordinator::new(config.build_iterators(d(2030, 1, 1), None).unwrap()).unwrap();
    runner.run(&mut config.params.clone(), &mut coordinator).unwrap();

    let entries = history.read_run(&run_id).unwrap();
    let journaled: Vec<(usize, &str)> = entries
        .iter()
        .map(|e| (e.iterator, e.year_month.as_str()))
        .collect();
    assert_eq!(
        journaled,
        vec![(0, "2023-06"), (1, "2022-12"), (0, "2023-05"), (1, "2022-11")]
    );

    // Pretend each iterator was configured for three months.
    let plan = |index| {
        ResumePlan::from_history(
            &entries,
            &run_id,
            index,
            PeriodKind::CalendarMonth,
            Direction::Backward,
            "usage",
            3,
        )
        .unwrap()
    };
    assert_eq!((plan(0).next_start, plan(0).remaining), (d(2023, 4, 1), 1));
    assert_eq!((plan(1).next_start, plan(1).remaining), (d(2022, 10, 1), 1));
}

#[test]
fn fiscal_iterator_reads_csv_calendar() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("fiscal.csv"),
        "year,month,fiscal_start,fiscal_end\n\
         2023,4,2023-03-26,2023-04-25\n\
         2023,5,2023-04-26,2023-05-25\n",
    );
    write(
        &dir.path().join("backfill.toml"),
        r#"
[backfill]
start_date = "2023-04-10"
direction = "forward"

[fiscal]
calendar = "fiscal.csv"

[[iterators]]
kind = "fiscal_month"
iterations = 2

[[queries]]
name = "fis"
sql = "select '{year_month}', '{start_date}', '{end_date}'"
"#,
    );

    let config = BackfillConfig::from_file(&dir.path().join("backfill.toml")).unwrap();
    let fiscal = config.load_fiscal().unwrap();
    let iterators = config.build_iterators(d(2030, 1, 1), fiscal).unwrap();
    let mut coordinator = RoundCoordinator::new(iterators).unwrap();
    let mut runner = BackfillRunner::new(config.load_queries(None).unwrap(), DryRunExecutor::new());
    runner.run(&mut config.params.clone(), &mut coordinator).unwrap();

    let sql: Vec<&str> = runner
        .executor()
        .statements()
        .iter()
        .map(|s| s.sql.as_str())
        .collect();
    assert_eq!(
        sql,
        vec![
            "select '2023-04', '2023-03-26', '2023-04-25'",
            "select '2023-05', '2023-04-26', '2023-05-25'",
        ]
    );
    assert!(runner
        .executor()
        .statements()
        .iter()
        .all(|s| s.target == QueryTarget::Direct));
}
