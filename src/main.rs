use std::str::FromStr;

use anyhow::Context;
use clap::{Arg, Command};
use formation::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use formation::scenario::ScenarioConfig;
use formation::simulation::SimulationEngine;
use tracing::error;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("formation")
        .version("0.1.0")
        .about("UAV編隊シミュレーション (Formation Simulation)")
        .long_about("UAVが仮想球面へ集合し周回するロックステップ分散シミュレーション\n\
                     各UAVを独立した参加者が所有し、毎ティックの集団交換で状態を共有します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、組み込みのハーフタイムショーを実行します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("render-every")
                .short('r')
                .long("render-every")
                .value_name("TICKS")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .help("N ティックごとに各UAVの位置を出力 (0: 出力しない)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    let output = match matches.get_one::<String>("log-output").map(|s| LogOutput::from_str(s)) {
        Some(Ok(output)) => output,
        Some(Err(message)) => {
            eprintln!("エラー: {}", message);
            std::process::exit(2);
        }
        None => LogOutput::Console,
    };
    let level = match matches.get_one::<String>("log-level") {
        Some(level) => parse_log_level(level),
        None => level_for_verbosity(verbose_level),
    };
    let _guard = match init_logging(LogConfig { level, output, ..LogConfig::default() }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("UAV編隊シミュレーション (Formation Simulation) - formation v0.1.0");
    println!();

    let scenario_path = matches.get_one::<String>("scenario").map(String::as_str);
    let render_every = matches.get_one::<u64>("render-every").copied().unwrap_or(0);

    if let Err(e) = run(scenario_path, matches.get_flag("info"), verbose_level, render_every) {
        error!(error = %format!("{:#}", e), "実行に失敗しました");
        eprintln!("エラー: {:#}", e);
        std::process::exit(1);
    }
}

/// シナリオを読み込んで実行
fn run(scenario_path: Option<&str>, info_only: bool, verbose_level: u8, render_every: u64) -> anyhow::Result<()> {
    let scenario = match scenario_path {
        Some(path) => {
            let scenario = ScenarioConfig::from_file(path)
                .with_context(|| format!("シナリオ {} を読み込めません", path))?;
            if verbose_level > 0 {
                println!("シナリオファイル読み込み完了: {}", path);
            }
            scenario
        }
        None => ScenarioConfig::halftime_show(),
    };

    scenario.print_summary();
    println!();

    if info_only {
        return Ok(());
    }

    let mut engine = SimulationEngine::new(scenario, verbose_level).with_render_every(render_every);
    engine.initialize().context("初期化に失敗しました")?;
    let report = engine.run().context("シミュレーションが停止しました")?;

    println!();
    report.print_summary();

    Ok(())
}
