use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

/// Connect as a brand-new user.
async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("spotbook")
        .user(Ulid::new().to_string())
        .password(std::env::var("SPOTBOOK_PASSWORD").unwrap_or_else(|_| "spotbook".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Midnight, one day from now.
fn tomorrow() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_millis() as i64;
    (now / DAY + 1) * DAY
}

async fn first_id(client: &Client, sql: &str) -> String {
    let messages = client.simple_query(sql).await.unwrap();
    messages
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(r) => r.get("id").map(String::from),
            _ => None,
        })
        .expect("statement returned no id")
}

async fn list_spot(client: &Client, label: &str) -> String {
    first_id(
        client,
        &format!("INSERT INTO spots (label, price_per_hour) VALUES ('{label}', 7.25)"),
    )
    .await
}

async fn publish(client: &Client, spot: &str, start: i64) -> String {
    let end = start + HOUR;
    first_id(
        client,
        &format!(r#"INSERT INTO windows (spot_id, start, "end") VALUES ('{spot}', {start}, {end})"#),
    )
    .await
}

/// Nearest-rank percentiles over a set of samples.
struct Latencies(Vec<Duration>);

impl Latencies {
    fn new(mut samples: Vec<Duration>) -> Self {
        samples.sort_unstable();
        Self(samples)
    }

    fn ms(d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0
    }

    fn at(&self, pct: usize) -> Duration {
        let rank = (self.0.len() * pct).div_ceil(100).max(1);
        self.0[rank.min(self.0.len()) - 1]
    }

    fn report(&self, label: &str) {
        let Some(&max) = self.0.last() else {
            println!("  {label}: no samples");
            return;
        };
        let mean = self.0.iter().sum::<Duration>() / self.0.len() as u32;
        println!(
            "  {label}: n={} mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.0.len(),
            Self::ms(mean),
            Self::ms(self.at(50)),
            Self::ms(self.at(95)),
            Self::ms(self.at(99)),
            Self::ms(max),
        );
    }
}

async fn phase1_sequential_publish(host: &str, port: u16) -> Vec<String> {
    let client = connect(host, port).await;
    let spot = list_spot(&client, "SEQ-1").await;
    let base = tomorrow();

    let n = 2000;
    let mut windows = Vec::with_capacity(n);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        windows.push(publish(&client, &spot, base + i as i64 * HOUR).await);
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} windows in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    Latencies::new(latencies).report("publish latency");
    windows
}

/// Many consumers race for the same windows; every window must be won
/// exactly once.
async fn phase2_booking_race(host: &str, port: u16, windows: &[String]) {
    let contested: Arc<Vec<String>> = Arc::new(windows.iter().take(100).cloned().collect());
    let n_consumers = 50;
    let wins = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..n_consumers {
        let host = host.to_string();
        let contested = contested.clone();
        let wins = wins.clone();
        let losses = losses.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            // Rotate so consumers collide on different windows first.
            for k in 0..contested.len() {
                let window = &contested[(c + k) % contested.len()];
                let sql = format!("INSERT INTO bookings (window_id) VALUES ('{window}')");
                match client.simple_query(&sql).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(_) => losses.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    println!(
        "  {n_consumers} consumers x {} windows: {wins} won, {} refused in {:.2}s",
        contested.len(),
        losses.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    // Consumers hit the active-booking limit, so not every window is sold.
    assert!(wins <= contested.len(), "a window was sold twice");
}

async fn phase3_search_under_load(host: &str, port: u16) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let spot = list_spot(&client, &format!("W-{w}")).await;
            let base = tomorrow() + 30 * DAY;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) && i < 9_000 {
                let end = base + (i + 1) * HOUR;
                let _ = client
                    .simple_query(&format!(
                        r#"INSERT INTO windows (spot_id, start, "end") VALUES ('{spot}', {}, {end})"#,
                        base + i * HOUR
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query("SELECT * FROM windows WHERE start_time >= '08:00' AND end_time <= '18:00'")
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
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    Latencies::new(all_latencies).report("search query");
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for n in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let spot = list_spot(&client, &format!("S-{n}")).await;
            let base = tomorrow() + 60 * DAY;
            for i in 0..ops_per_conn {
                publish(&client, &spot, base + i as i64 * HOUR).await;
            }
            client.simple_query("SELECT * FROM alerts").await.unwrap();
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SPOTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SPOTBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SPOTBOOK_PORT");

    println!("=== spotbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential window publishing");
    let windows = phase1_sequential_publish(&host, port).await;

    println!("\n[phase 2] booking race");
    phase2_booking_race(&host, port, &windows).await;

    println!("\n[phase 3] search latency under write load");
    phase3_search_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
