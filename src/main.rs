use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kettlebell_tracker::calibration::{
    calibration_from_samples, load_calibration, save_calibration, thresholds_from_calibration, Calibration,
    CalibrationSample,
};
use kettlebell_tracker::config::Config;
use kettlebell_tracker::inference::{FramePool, MoveNetFactory, PoseClient};
use kettlebell_tracker::replay::{load_records, replay, PoseRecord};
use kettlebell_tracker::session::{ExerciseId, FrameOutput, Pipeline};
use kettlebell_tracker::signals::{extract_motion_signals, HandMode};

const VERSION: &str = env!("GIT_VERSION");

#[derive(Parser, Debug)]
#[command(name = "kettlebell-tracker", version, about = "Kettlebell rep counter")]
struct Args {
    /// TOML 設定ファイル
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 記録した JSON-lines のポーズ列を再生してカウントする
    Replay {
        input: PathBuf,
        /// 設定の [session].exercise を上書き
        #[arg(long)]
        exercise: Option<ExerciseId>,
        /// キャリブレーション JSON
        #[arg(long, value_name = "FILE")]
        calibration: Option<PathBuf>,
    },
    /// 記録から可動域を求めて保存する
    Calibrate {
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// 画像フレーム列を MoveNet で推論してカウントする
    Frames {
        /// PNG/JPEG フレームを含むディレクトリ（ファイル名順）
        dir: PathBuf,
        #[arg(long)]
        exercise: Option<ExerciseId>,
        #[arg(long, value_name = "FILE")]
        calibration: Option<PathBuf>,
        #[arg(long, default_value_t = 30.0)]
        fps: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config);

    println!("=== Kettlebell Tracker ({}) ===", VERSION);

    match args.command {
        Command::Replay { input, exercise, calibration } => {
            let mut pipeline = build_pipeline(&config, exercise, calibration.as_deref())?;
            run_replay(&mut pipeline, &input)
        }
        Command::Calibrate { input, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&config.session.calibration_path));
            run_calibrate(&config, &input, &output)
        }
        Command::Frames { dir, exercise, calibration, fps } => {
            let mut pipeline = build_pipeline(&config, exercise, calibration.as_deref())?;
            run_frames(&config, &mut pipeline, &dir, fps)
        }
    }
}

/// 指定があればそのファイル、無ければ設定の保存先、それも無ければ [calibration]
fn resolve_calibration(config: &Config, path: Option<&Path>) -> Result<Calibration> {
    if let Some(path) = path {
        return load_calibration(path);
    }
    let saved = Path::new(&config.session.calibration_path);
    if saved.exists() {
        return load_calibration(saved);
    }
    Ok(config.calibration)
}

fn build_pipeline(config: &Config, exercise: Option<ExerciseId>, calibration: Option<&Path>) -> Result<Pipeline> {
    let calibration = resolve_calibration(config, calibration)?;
    let exercise = exercise.unwrap_or(config.session.exercise);
    let mut pipeline =
        Pipeline::with_config(exercise, &calibration, config.hand_tracker.clone(), config.swing.clone());
    if exercise == config.session.exercise {
        pipeline.set_hand_mode(config.hand_mode());
    }

    let t = pipeline.thresholds();
    println!("種目: {}", exercise);
    println!("手の選択: {:?}", pipeline.hand_mode());
    println!(
        "閾値: apex={:.2} reset={:.2} hinge_exit={:.1} min_rep={}ms",
        t.apex_height, t.reset_height, t.hinge_exit, t.min_rep_ms
    );
    println!();
    Ok(pipeline)
}

/// カウント・フェーズ変化・ジェスチャーを表示
struct Printer {
    last_count: u32,
    last_state: Option<&'static str>,
    last_exercise: Option<ExerciseId>,
}

impl Printer {
    fn new() -> Self {
        Self { last_count: 0, last_state: None, last_exercise: None }
    }

    fn frame(&mut self, ts: u64, out: &FrameOutput) {
        for g in &out.gestures {
            println!("[{:>7}ms] ジェスチャー: {}", ts, g.id.name());
        }
        if self.last_exercise.is_some_and(|e| e != out.exercise) {
            println!("[{:>7}ms] 種目変更: {}", ts, out.exercise);
            self.last_count = 0;
        }
        self.last_exercise = Some(out.exercise);

        let Some(update) = &out.update else {
            return;
        };
        if update.count != self.last_count {
            let hand = out.selection.active.map(|h| format!("{:?}", h)).unwrap_or_else(|| "-".into());
            println!("[{:>7}ms] レップ {} (手: {})", ts, update.count, hand);
            self.last_count = update.count;
        }
        if self.last_state != Some(update.state) {
            tracing::debug!(ts, state = update.state, "phase");
            self.last_state = Some(update.state);
        }
    }
}

fn run_replay(pipeline: &mut Pipeline, input: &Path) -> Result<()> {
    let records = load_records(input)?;
    println!("{} フレーム読み込み: {}", records.len(), input.display());

    let mut printer = Printer::new();
    let summary = replay(pipeline, &records, |record, out| printer.frame(record.ts, out));

    println!();
    println!("=== 結果 ===");
    println!("  フレーム数: {} (有効 {})", summary.frames, summary.usable_frames);
    println!("  レップ数: {}", summary.count);
    println!("  ジェスチャー: {}", summary.gestures.len());
    Ok(())
}

fn run_calibrate(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let records = load_records(input)?;
    let samples: Vec<CalibrationSample> = records
        .iter()
        .map(PoseRecord::pose)
        .map(|pose| CalibrationSample::from(&extract_motion_signals(&pose, HandMode::Highest, None)))
        .collect();

    let cal = calibration_from_samples(&samples, config.calibration);
    let t = thresholds_from_calibration(&cal);
    println!("サンプル数: {}", samples.len());
    println!("  股関節角: {:.1} - {:.1}", cal.hip_angle_min, cal.hip_angle_max);
    println!("  手の高さ: {:.2} - {:.2}", cal.hand_height_min, cal.hand_height_max);
    println!("  apex={:.2} reset={:.2} hinge_exit={:.1}", t.apex_height, t.reset_height, t.hinge_exit);

    save_calibration(output, &cal)?;
    println!("保存しました: {}", output.display());
    Ok(())
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        })
        .collect();
    frames.sort();
    if frames.is_empty() {
        bail!("フレーム画像がありません: {}", dir.display());
    }
    Ok(frames)
}

fn run_frames(config: &Config, pipeline: &mut Pipeline, dir: &Path, fps: f32) -> Result<()> {
    let frames = list_frames(dir)?;
    let frame_ms = (1000.0 / fps.max(1.0)) as u64;
    println!("{} フレーム ({} ms 間隔)", frames.len(), frame_ms);

    let pool = FramePool::new(config.inference.pool_size);
    let mut client = PoseClient::spawn(
        Box::new(MoveNetFactory::new(&config.inference.model_path)),
        config.inference.backends.clone(),
    )?;

    let results = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&results);
    client.on_poses(move |poses, ts| {
        if let Some(pose) = poses.first() {
            sink.borrow_mut().push(PoseRecord::from_pose(pose, ts));
        }
    });
    client.on_ready(|backend| println!("推論バックエンド: {}", backend.name()));
    client.on_error(|message| eprintln!("推論エラー: {}", message));

    client.init();
    client.poll_timeout(Duration::from_secs(30));
    if client.backend().is_none() {
        bail!("推論モデルを初期化できません: {}", config.inference.model_path);
    }

    let mut printer = Printer::new();
    for (i, path) in frames.iter().enumerate() {
        let image = image::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .to_rgb8();
        let ts = i as u64 * frame_ms;
        let frame = pool.lease_rgb(image.width(), image.height(), ts, image.as_raw())?;
        client.send_frame(frame);

        // 1フレームずつ結果を待つ
        client.poll_timeout(Duration::from_secs(5));
        for record in results.borrow_mut().drain(..) {
            let out = pipeline.process(&record.pose(), record.ts);
            printer.frame(record.ts, &out);
        }
    }

    println!();
    println!("=== 結果 ===");
    println!("  レップ数: {}", pipeline.count());
    Ok(())
}
