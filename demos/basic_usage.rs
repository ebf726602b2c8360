// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic adaptive-sync usage example.
//!
//! Demonstrates:
//! 1. Writing while offline (lands in the local store only)
//! 2. Cached reads
//! 3. Reconnecting and migrating offline edits to the cloud
//! 4. A user-choice conflict waiting for a decision
//! 5. Displaying metrics
//!
//! Both stores are in-memory, so nothing needs to be running.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Instant;
use adaptive_sync::{
    ConflictStrategy, Decision, EngineConfig, Entity, InMemoryStore, ManualConnectivity, PersistenceEngine,
    StoreHandle,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           adaptive-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Build the engine, starting offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring engine (offline)...");
    let local = Arc::new(InMemoryStore::new("local"));
    let cloud = Arc::new(InMemoryStore::new("cloud"));
    let connectivity = Arc::new(ManualConnectivity::new(false));

    let config = EngineConfig {
        conflict_strategy: ConflictStrategy::UserChoice,
        ..Default::default()
    };
    let engine = PersistenceEngine::new(config, local.clone(), cloud.clone(), connectivity.clone());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Offline writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing 5 notes while offline...");
    for i in 1..=5 {
        let id = format!("note.{}", i);
        engine.write(Entity::new(&id, json!({"title": format!("Note {}", i)}))).await?;
        println!("   └─ Wrote {}", id);
    }
    println!("   local={} cloud={}", local.len(), cloud.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Cached reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading note.1 twice...");
    for attempt in 1..=2 {
        let start = Instant::now();
        let note = engine.read("note.1").await?;
        println!(
            "   └─ read #{} → {} ({:?})",
            attempt,
            note.map(|n| n.payload.to_string()).unwrap_or_else(|| "NOT FOUND".into()),
            start.elapsed()
        );
    }
    let stats = engine.cache().stats();
    println!("   Cache: hits={} misses={} entries={}", stats.hits, stats.misses, stats.entries);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Someone else edits note.3 in the cloud, then we reconnect
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🌐 Reconnecting...");
    let mut remote = Entity::new("note.3", json!({"title": "Edited on another device"}));
    remote.updated_at += 1;
    cloud.put(&remote).await?;
    connectivity.set_online(true);

    let result = engine
        .migrate_with(
            |current, total| println!("   └─ progress {}/{}", current, total),
            |case| println!("   ⚠️  conflict on {}", case.key),
            None,
        )
        .await?;
    println!(
        "   Migrated: created_cloud={} failures={} conflicts={}",
        result.created_cloud,
        result.failures.len(),
        result.conflicts.len()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Answer the conflict
    // ─────────────────────────────────────────────────────────────────────────
    for (id, case) in engine.pending_conflicts() {
        println!("\n🤔 {} local={} cloud={}", id, case.local.payload, case.cloud.payload);
        engine.decide(id, Decision::KeepCloud)?;
    }
    let result = engine.apply_decisions().await?;
    println!("   Applied decisions: written={}", result.written());
    println!("   In sync: {}", local.snapshot() == cloud.snapshot());

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Transactions: {:?}", engine.transactions().stats());
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
