//! Cached reads example for streamcache
//!
//! This example demonstrates a complete stream stack:
//! - Writing an asset file to a temporary directory
//! - Building a block cache on top of a file system drive
//! - Streaming the file in small unaligned chunks
//! - Inspecting statistics and reports

use streamcache::stats::StatisticValue;
use streamcache::{BlockCache, FileSystemBackend, Options, ReportType, StorageDrive, Streamer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Write an asset to stream from
    let dir = tempfile::tempdir()?;
    let asset: Vec<u8> = (0..2_000_000u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(dir.path().join("level.pak"), &asset)?;

    // 512 KiB of 64 KiB blocks in front of the drive
    let options = Options::new().cache_size(512 * 1024).block_size(64 * 1024).name("Asset cache");
    println!("Options: {}", options.to_json()?);
    let drive = StorageDrive::new(FileSystemBackend::new(dir.path()));
    let cache = BlockCache::new(options)?.with_next(Box::new(drive));
    let mut streamer = Streamer::new(Box::new(cache));

    // Stream the first 500 KB in 5 KB chunks, the way a decoder would
    println!("Streaming...");
    let mut offset = 0u64;
    while offset < 500_000 {
        let (request, buffer) = streamer.read("level.pak", offset, 5_000);
        streamer.run_until_complete(request, 1000)?;
        assert_eq!(buffer.to_vec(), &asset[offset as usize..offset as usize + 5_000]);
        streamer.release(request);
        offset += 5_000;
    }

    // Print statistics
    for statistic in streamer.collect_statistics() {
        let value = match &statistic.value {
            StatisticValue::PercentageRange { average, .. } => format!("{:.1}%", average * 100.0),
            StatisticValue::Integer(value) => value.to_string(),
            StatisticValue::ByteSize(value) => format!("{} bytes", value),
            StatisticValue::Boolean(value) => value.to_string(),
            StatisticValue::Text(value) => value.clone(),
        };
        println!("{:>14} | {:<20} {}", statistic.owner, statistic.name, value);
    }

    // Print the files held by the cache
    let cached = streamer.report(ReportType::CachedFiles, 10)?;
    println!("Cached files: {}", serde_json::to_string(&cached)?);

    Ok(())
}
