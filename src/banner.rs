//! Startup banner and shutdown summary for the long-running commands.

use crate::worker::WorkerReport;

/// What a worker or server is running with, for the startup banner.
pub struct BannerInfo<'a> {
    pub role: &'a str,
    pub providers: &'a [&'a str],
    pub queue: &'a str,
    pub store: &'a str,
    pub ack_mode: &'a str,
    pub concurrency: usize,
    /// Listening address, for `serve`.
    pub bind: Option<&'a str>,
}

pub fn print_banner(info: &BannerInfo) {
    let providers = if info.providers.is_empty() {
        "none".to_string()
    } else {
        info.providers.join(", ")
    };
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║             C H O R U S               ║
   ║     one prompt, many voices           ║
   ╚═══════════════════════════════════════╝

   version      {}
   role         {}
   providers    {}
   queue        {}
   store        {}
   ack          {}
   concurrency  {}"#,
        env!("CARGO_PKG_VERSION"),
        info.role,
        providers,
        info.queue,
        info.store,
        info.ack_mode,
        info.concurrency,
    );
    if let Some(bind) = info.bind {
        println!("   listening    http://{bind}");
    }
    println!();
}

/// Counters printed once the worker has stopped.
pub fn print_worker_summary(report: &WorkerReport) {
    if report.received > 0 {
        println!(
            "tasks: {:>5} received, {:>5} completed, {:>5} dropped, {:>5} store failures",
            report.received, report.completed, report.dropped, report.store_failures,
        );
    } else {
        println!("tasks: none received");
    }
    println!("goodbye.");
}
