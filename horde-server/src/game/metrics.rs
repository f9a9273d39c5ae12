//! Per-tick performance sampling and the end-of-match JSON report.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::game::EngineConfigs;
use crate::game::scene::Scene;

const METRICS_ROOT_DIR: &str = "server_metrics";

/// One sampled tick. Aggregates cover every tick; rows only every
/// `perf_sample_stride`-th one.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PerfSample {
    pub tick: u64,
    pub logic_ms: f64,
    pub dt_seconds: f64,
    pub players: u32,
    pub enemies: u32,
    pub projectiles: u32,
    pub items: u32,
    pub dirty_players: u32,
    pub dirty_enemies: u32,
    pub dirty_items: u32,
    pub delta_items: u32,
    pub sync_items: u32,
    pub paused: bool,
}

pub struct PerfStats {
    pub samples: Vec<PerfSample>,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub tick_count: u64,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl Default for PerfStats {
    fn default() -> Self {
        let now = Local::now();
        Self {
            samples: Vec::new(),
            total_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            tick_count: 0,
            start_time: now,
            end_time: now,
        }
    }
}

impl PerfStats {
    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_ms = 0.0;
        self.min_ms = 0.0;
        self.max_ms = 0.0;
        self.tick_count = 0;
        self.start_time = Local::now();
        self.end_time = self.start_time;
    }
}

/// Updates the aggregates every tick and keeps a sample row per stride.
pub fn record_perf_sample(
    configs: &EngineConfigs,
    scene: &mut Scene,
    elapsed_ms: f64,
    dt_seconds: f64,
    is_paused: bool,
    delta_items: u32,
    sync_items: u32,
) {
    let perf = &mut scene.perf;
    perf.tick_count += 1;
    perf.total_ms += elapsed_ms;
    if perf.tick_count == 1 {
        perf.min_ms = elapsed_ms;
        perf.max_ms = elapsed_ms;
    } else {
        perf.min_ms = perf.min_ms.min(elapsed_ms);
        perf.max_ms = perf.max_ms.max(elapsed_ms);
    }

    let stride = configs.server.perf_sample_stride.max(1) as u64;
    if stride > 1 && scene.tick % stride != 0 {
        return;
    }

    let sample = PerfSample {
        tick: scene.tick,
        logic_ms: elapsed_ms,
        dt_seconds,
        players: scene.players.len() as u32,
        enemies: scene.enemies.len() as u32,
        projectiles: scene.projectiles.len() as u32,
        items: scene.items.len() as u32,
        dirty_players: scene.dirty_player_ids.len() as u32,
        dirty_enemies: scene.dirty_enemy_ids.len() as u32,
        dirty_items: scene.dirty_item_ids.len() as u32,
        delta_items,
        sync_items,
        paused: is_paused,
    };
    scene.perf.samples.push(sample);
}

/// Snapshot taken on game over, persisted off the tick path.
pub struct PerfReport {
    pub stats: PerfStats,
    pub tick_rate: u32,
    pub sync_rate: u32,
    pub elapsed_seconds: f64,
}

pub fn capture_report(configs: &EngineConfigs, scene: &mut Scene) -> PerfReport {
    scene.perf.end_time = Local::now();
    PerfReport {
        stats: std::mem::take(&mut scene.perf),
        tick_rate: configs.server.tick_rate,
        sync_rate: configs.server.state_sync_rate,
        elapsed_seconds: scene.elapsed,
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    room_id: u32,
    start_time: String,
    end_time: String,
    elapsed_seconds: f64,
    tick_rate: u32,
    sync_rate: u32,
    tick_count: u64,
    avg_ms: f64,
    min_ms: f64,
    max_ms: f64,
    p95_ms: f64,
    dirty_player_ratio: f64,
    dirty_enemy_ratio: f64,
    dirty_item_ratio: f64,
    samples: &'a [PerfSample],
}

/// `server_metrics/<date>/room_<id>_run_<epoch_ms>.json` under the working
/// directory; the blocking write runs off the executor.
pub fn save_report(room_id: u32, report: PerfReport) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = write_report(std::path::Path::new(METRICS_ROOT_DIR), room_id, &report) {
            tracing::warn!(room_id, %err, "failed to persist metrics report");
        }
    });
}

fn write_report(root: &std::path::Path, room_id: u32, report: &PerfReport) -> std::io::Result<()> {
    let date_dir = report.stats.end_time.format("%Y-%m-%d").to_string();
    let dir = root.join(date_dir);
    std::fs::create_dir_all(&dir)?;

    let epoch_ms = report.stats.end_time.timestamp_millis();
    let path = dir.join(format!("room_{room_id}_run_{epoch_ms}.json"));
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, &build_document(room_id, report))
        .map_err(std::io::Error::other)?;

    tracing::info!(room_id, path = %path.display(), "metrics report saved");
    Ok(())
}

fn build_document(room_id: u32, report: &PerfReport) -> ReportDocument<'_> {
    let stats = &report.stats;
    let avg_ms = if stats.tick_count > 0 {
        stats.total_ms / stats.tick_count as f64
    } else {
        0.0
    };

    let mut sum_players = 0u64;
    let mut sum_enemies = 0u64;
    let mut sum_items = 0u64;
    let mut sum_dirty_players = 0u64;
    let mut sum_dirty_enemies = 0u64;
    let mut sum_dirty_items = 0u64;
    let mut ms_values: Vec<f64> = Vec::with_capacity(stats.samples.len());
    for sample in &stats.samples {
        ms_values.push(sample.logic_ms);
        sum_players += sample.players as u64;
        sum_enemies += sample.enemies as u64;
        sum_items += sample.items as u64;
        sum_dirty_players += sample.dirty_players as u64;
        sum_dirty_enemies += sample.dirty_enemies as u64;
        sum_dirty_items += sample.dirty_items as u64;
    }

    let ratio = |dirty: u64, total: u64| -> f64 {
        if total > 0 {
            dirty as f64 / total as f64
        } else {
            0.0
        }
    };

    ReportDocument {
        room_id,
        start_time: stats.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        end_time: stats.end_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        elapsed_seconds: report.elapsed_seconds,
        tick_rate: report.tick_rate,
        sync_rate: report.sync_rate,
        tick_count: stats.tick_count,
        avg_ms,
        min_ms: stats.min_ms,
        max_ms: stats.max_ms,
        p95_ms: percentile(ms_values, 0.95),
        dirty_player_ratio: ratio(sum_dirty_players, sum_players),
        dirty_enemy_ratio: ratio(sum_dirty_enemies, sum_enemies),
        dirty_item_ratio: ratio(sum_dirty_items, sum_items),
        samples: &stats.samples,
    }
}

fn percentile(mut values: Vec<f64>, percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let clamped = percentile.clamp(0.0, 1.0);
    let index = (clamped * (values.len() - 1) as f64).ceil() as usize;
    values.sort_by(|a, b| a.total_cmp(b));
    values[index]
}
