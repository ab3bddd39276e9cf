use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;
/// First conference day used by the bench, far enough out to be stable.
const BASE_DAY: i64 = 20_000;

/// The i-th bookable one-hour slot: ten per day (09:00–19:00), then the next
/// day. Keeps every generated booking inside operating hours.
fn slot(i: i64) -> (i64, i64) {
    let day = BASE_DAY + i / 10;
    let start = day * DAY_MS + (9 + i % 10) * HOUR;
    (start, start + HOUR)
}

async fn connect_db(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("callboard")
        .password("callboard");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    connect_db(host, port, &format!("bench_{}", Ulid::new())).await
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn create_room(client: &tokio_postgres::Client) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, capacity) VALUES ('{rid}', 'Bench Hall', 200)"
        ))
        .await
        .unwrap();
    rid
}

async fn accepted_talk(client: &tokio_postgres::Client) -> Ulid {
    let tid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO talks (id, title, speaker, subject, duration, level) VALUES ('{tid}', 'Bench Talk', 'Bencher', 'Load', 60, 'intermediate')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "UPDATE talks SET status = 'accepted' WHERE id = '{tid}'"
        ))
        .await
        .unwrap();
    tid
}

async fn book(client: &tokio_postgres::Client, room: Ulid, talk: Ulid, i: i64) {
    let bid = Ulid::new();
    let (s, e) = slot(i);
    client
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, talk_id, room_id, start, "end") VALUES ('{bid}', '{talk}', '{room}', {s}, {e})"#
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let rid = create_room(&client).await;

    let n = 1000;
    // Pre-create the talks so the measured latency is the commit alone.
    let mut talks = Vec::with_capacity(n);
    for _ in 0..n {
        talks.push(accepted_talk(&client).await);
    }

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for (i, talk) in talks.into_iter().enumerate() {
        let t = Instant::now();
        book(&client, rid, talk, i as i64).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} commits in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task uses its own conference (unique dbname from connect())
            let client = connect(&host, port).await;
            let rid = create_room(&client).await;
            for j in 0..n_per_task {
                let talk = accepted_talk(&client).await;
                book(&client, rid, talk, j as i64).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} commits = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// All contenders fight for the same room and slot; exactly one should win
/// per slot, the rest should be turned away with a conflict.
async fn phase3_contention(host: &str, port: u16) {
    let n_tasks = 10;
    let n_slots = 50;

    // One shared conference for the contention fight.
    let dbname = format!("bench_contention_{}", Ulid::new());

    let setup = connect_db(host, port, &dbname).await;
    let rid = create_room(&setup).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let dbname = dbname.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let mut wins = 0usize;
            let mut conflicts = 0usize;
            for i in 0..n_slots {
                let talk = accepted_talk(&client).await;
                let bid = Ulid::new();
                let (s, e) = slot(i as i64);
                let result = client
                    .batch_execute(&format!(
                        r#"INSERT INTO bookings (id, talk_id, room_id, start, "end") VALUES ('{bid}', '{talk}', '{rid}', {s}, {e})"#
                    ))
                    .await;
                match result {
                    Ok(_) => wins += 1,
                    Err(_) => conflicts += 1,
                }
            }
            (wins, conflicts)
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for h in handles {
        let (w, c) = h.await.unwrap();
        wins += w;
        conflicts += c;
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks x {n_slots} slots: {wins} wins, {conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, n_slots, "each slot must have exactly one winner");
}

async fn phase4_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously commit bookings in their own conferences
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rid = create_room(&client).await;
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let talk = accepted_talk(&client).await;
                book(&client, rid, talk, i).await;
                i += 1;
            }
        }));
    }

    // Reader tasks: query free slots and measure latency
    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rid = create_room(&client).await;
            // Half-fill a day so enumeration is non-trivial
            for i in 0..5 {
                let talk = accepted_talk(&client).await;
                book(&client, rid, talk, i * 2).await;
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM free_slots WHERE room_id = '{rid}' AND day = {BASE_DAY}"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("free_slots query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 5;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rid = create_room(&client).await;
            for i in 0..ops_per_conn {
                let talk = accepted_talk(&client).await;
                book(&client, rid, talk, i as i64).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} commits each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CALLBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CALLBOARD_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid CALLBOARD_PORT");

    println!("=== callboard stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own conference (unique dbname) to avoid interference

    println!("[phase 1] sequential commit throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent commit throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] same-slot contention");
    phase3_contention(&host, port).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
