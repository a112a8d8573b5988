use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const ADDRESSES: &[&str] = &["0x1a2b", "0x3c4d", "0x5e6f", "0x7a8b", "0x9c0d"];
const SEVERITIES: &[&str] = &["low", "low", "low", "medium", "medium", "high", "critical"];
const BRIDGE_TYPES: &[&str] = &["High Pending Transfers", "High Completion Time", "Stuck Transfer"];
const SECURITY_TYPES: &[&str] = &["Large Transfer Detected", "Suspicious Repeated Calls", "Contract Deployment"];
const SYSTEM_TYPES: &[&str] = &["High CPU Usage", "High Memory Usage", "High Disk Usage", "API Error Rate High"];
const HOSTS: &[&str] = &["api-1", "api-2", "indexer-1", "relayer-1"];

fn transfer_failure(rng: &mut StdRng) -> Value {
    json!({
        "type": "Transfer Failed",
        "data": {
            "from": ADDRESSES.choose(rng).copied().unwrap_or("0x0"),
            "to": ADDRESSES.choose(rng).copied().unwrap_or("0x0"),
            "amount": rng.gen_range(1..10_000),
            "severity": SEVERITIES.choose(rng).copied().unwrap_or("low")
        }
    })
}

fn bridge_alert(rng: &mut StdRng) -> Value {
    json!({
        "type": BRIDGE_TYPES.choose(rng).copied().unwrap_or("Stuck Transfer"),
        "data": {
            "pending": rng.gen_range(10..500),
            "severity": SEVERITIES.choose(rng).copied().unwrap_or("low")
        }
    })
}

fn security_alert(rng: &mut StdRng) -> Value {
    json!({
        "type": SECURITY_TYPES.choose(rng).copied().unwrap_or("Large Transfer Detected"),
        "data": {
            "from": ADDRESSES.choose(rng).copied().unwrap_or("0x0"),
            "recipient": ADDRESSES.choose(rng).copied().unwrap_or("0x0"),
            "amount": rng.gen_range(100_000..5_000_000),
            "severity": "high"
        }
    })
}

fn system_alert(rng: &mut StdRng) -> Value {
    json!({
        "type": SYSTEM_TYPES.choose(rng).copied().unwrap_or("High CPU Usage"),
        "data": {
            "host": HOSTS.choose(rng).copied().unwrap_or("api-1"),
            "value": rng.gen_range(80.0..100.0),
            "severity": SEVERITIES.choose(rng).copied().unwrap_or("low")
        }
    })
}

struct LoadStats {
    total_alerts: usize,
    total_duration: Duration,
    latencies: Vec<Duration>,
    correlations: usize,
}

impl LoadStats {
    fn alerts_per_sec(&self) -> f64 {
        self.total_alerts as f64 / self.total_duration.as_secs_f64().max(f64::EPSILON)
    }

    fn percentile(&self, pct: usize) -> Duration {
        let mut sorted = self.latencies.clone();
        sorted.sort();
        sorted
            .get((sorted.len() * pct / 100).min(sorted.len().saturating_sub(1)))
            .copied()
            .unwrap_or_default()
    }

    fn avg_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.latencies.iter().sum();
        sum / self.latencies.len() as u32
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let alerts_per_producer: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let seed: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(12345);
    let host = std::env::var("KLAXON_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("KLAXON_PORT").unwrap_or_else(|_| "8080".to_string());
    let base_url = format!("http://{}:{}", host, port);

    println!("Klaxon Alert Load");
    println!("=================");
    println!("Target:              {}", base_url);
    println!("Alerts per producer: {}", alerts_per_producer);
    println!();

    let client = Client::new();
    let mut rng = StdRng::seed_from_u64(seed);

    for producer in ["transfers", "bridge", "security", "system"] {
        print!("Producing {} alerts... ", producer);
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut latencies = Vec::with_capacity(alerts_per_producer);
        let mut correlations = 0;
        let start = Instant::now();

        for _ in 0..alerts_per_producer {
            let alert = match producer {
                "transfers" => transfer_failure(&mut rng),
                "bridge" => bridge_alert(&mut rng),
                "security" => security_alert(&mut rng),
                _ => system_alert(&mut rng),
            };

            let request_start = Instant::now();
            let response = client
                .post(format!("{}/alerts", base_url))
                .json(&alert)
                .send()
                .await?;

            if !response.status().is_success() {
                eprintln!("Error: {}", response.text().await?);
                return Ok(());
            }
            latencies.push(request_start.elapsed());

            let outcome: Value = response.json().await?;
            correlations += outcome["correlations"].as_array().map(|c| c.len()).unwrap_or(0);
        }

        let stats = LoadStats {
            total_alerts: alerts_per_producer,
            total_duration: start.elapsed(),
            latencies,
            correlations,
        };

        println!("done");
        println!("  Alerts/sec:    {:.0}", stats.alerts_per_sec());
        println!("  Correlations:  {}", stats.correlations);
        println!("  Latency:       avg={:?} p50={:?} p99={:?}",
            stats.avg_latency(), stats.percentile(50), stats.percentile(99));
        println!();
    }

    println!("Engine Statistics:");
    let stats: Value = client
        .get(format!("{}/stats", base_url))
        .send()
        .await?
        .json()
        .await?;

    println!("  Alerts received:     {}", stats["alerts_received"]);
    println!("  Correlations fired:  {}", stats["correlations_fired"]);
    println!("  Active instances:    {}", stats["escalation"]["active"]);
    println!("  Running timers:      {}", stats["escalation"]["running_timers"]);

    Ok(())
}
