use super::*;
use crate::clock::ManualClock;
use crate::memory::{BoundedAllocator, OutputTarget, SharedBuffer};
use crate::request::{FlushData, ReportData, ReportType};
use crate::stats::{self, StatisticValue};
use std::time::Duration;

const BLOCK: u64 = 4096;
const FILE_LEN: usize = 20000;

/// Next stage that only records what it receives. Tests complete the
/// requests themselves.
struct RecordingStage {
    queued: Arc<Mutex<VecDeque<RequestId>>>,
}

impl StreamStackEntry for RecordingStage {
    fn name(&self) -> &str {
        "Fake drive"
    }

    fn set_next(&mut self, _next: Option<Box<dyn StreamStackEntry>>) {}

    fn next_name(&self) -> Option<String> {
        None
    }

    fn queue_request(&mut self, _ctx: &mut StreamerContext, request: RequestId) {
        self.queued.lock().push_back(request);
    }

    fn execute_requests(&mut self, _ctx: &mut StreamerContext) -> bool {
        false
    }

    fn update_status(&self, status: &mut Status) {
        if !self.queued.lock().is_empty() {
            status.is_idle = false;
        }
    }

    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        _internal_pending: &mut Vec<RequestId>,
    ) {
        for &request in self.queued.lock().iter() {
            ctx.set_estimated_completion(request, now + Duration::from_millis(1));
        }
    }

    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        statistics.push(Statistic::integer("Fake drive", "Queued", self.queued.lock().len() as i64));
    }
}

struct Harness {
    ctx: StreamerContext,
    cache: BlockCache,
    queued: Arc<Mutex<VecDeque<RequestId>>>,
    files: HashMap<RequestPath, Vec<u8>>,
    data_reads: Vec<(u64, u64)>,
    clock: Arc<ManualClock>,
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn options(num_blocks: u64) -> Options {
    Options::new().cache_size(num_blocks * BLOCK).block_size(BLOCK).alignment(BLOCK)
}

impl Harness {
    fn new(options: Options) -> Self {
        let clock = Arc::new(ManualClock::new());
        let queued = Arc::new(Mutex::new(VecDeque::new()));
        let cache =
            BlockCache::with_dependencies(options, clock.clone(), Arc::new(HeapAllocator))
                .unwrap()
                .with_next(Box::new(RecordingStage { queued: queued.clone() }));
        let mut files = HashMap::new();
        files.insert(RequestPath::new("a.bin"), pattern(FILE_LEN));
        Self {
            ctx: StreamerContext::with_clock(clock.clone()),
            cache,
            queued,
            files,
            data_reads: Vec::new(),
            clock,
        }
    }

    fn path(&self) -> RequestPath {
        RequestPath::new("a.bin")
    }

    fn queue(&mut self, command: Command) -> RequestId {
        let request = self.ctx.create_external_request(command);
        self.cache.queue_request(&mut self.ctx, request);
        request
    }

    fn read(&mut self, offset: u64, size: u64) -> (RequestId, SharedBuffer) {
        let buffer = SharedBuffer::new(size as usize);
        let request = self.queue(Command::Read(ReadData {
            output: OutputTarget::new(buffer.clone()),
            output_size: size,
            path: self.path(),
            offset,
            size,
            shared_read: false,
        }));
        (request, buffer)
    }

    fn pop_queued(&self) -> Option<RequestId> {
        self.queued.lock().pop_front()
    }

    fn complete(&mut self, request: RequestId, success: bool) {
        if success {
            match self.ctx.command_mut(request) {
                Some(Command::Read(data)) => {
                    let start = data.offset as usize;
                    let end = start + data.size as usize;
                    let file = &self.files[&data.path];
                    data.output.write(&file[start..end]).unwrap();
                    self.data_reads.push((data.offset, data.size));
                }
                Some(Command::FileMetaDataRetrieval(data)) => match self.files.get(&data.path) {
                    Some(file) => {
                        data.found = true;
                        data.file_size = file.len() as u64;
                    }
                    None => data.found = false,
                },
                Some(Command::FileExistsCheck(data)) => data.found = self.files.contains_key(&data.path),
                _ => {}
            }
        } else {
            self.ctx.set_status(request, RequestStatus::Failed);
        }
        self.ctx.mark_request_as_completed(request);
    }

    /// Complete every queued request and let the cache settle.
    fn run(&mut self) {
        for _ in 0..100 {
            let mut worked = false;
            while let Some(request) = self.pop_queued() {
                self.complete(request, true);
                worked = true;
            }
            worked |= self.cache.execute_requests(&mut self.ctx);
            worked |= self.ctx.finalize_completed_requests();
            if !worked && self.queued.lock().is_empty() {
                return;
            }
        }
        panic!("stack did not settle");
    }

    /// Complete only the queued file size queries and finalize them.
    fn complete_metadata(&mut self) {
        let queued: Vec<RequestId> = self.queued.lock().drain(..).collect();
        for request in queued {
            if matches!(self.ctx.command(request), Some(Command::FileMetaDataRetrieval(_))) {
                self.complete(request, true);
            } else {
                self.queued.lock().push_back(request);
            }
        }
        self.ctx.finalize_completed_requests();
    }

    fn expected(&self, offset: u64, size: u64) -> Vec<u8> {
        self.files[&self.path()][offset as usize..(offset + size) as usize].to_vec()
    }

    fn sorted_reads(&self) -> Vec<(u64, u64)> {
        let mut reads = self.data_reads.clone();
        reads.sort_unstable();
        reads
    }
}

#[test]
fn test_unaligned_read_round_trip() {
    let mut h = Harness::new(options(4));

    let (request, buffer) = h.read(100, 12000);
    h.run();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(100, 12000));
    assert_eq!(h.sorted_reads(), vec![(0, BLOCK), (BLOCK, BLOCK), (2 * BLOCK, BLOCK)]);

    h.data_reads.clear();
    let (request, buffer) = h.read(100, 12000);
    h.run();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(100, 12000));
    // Prolog and epilog come from the cache; only the aligned middle is read.
    assert_eq!(h.sorted_reads(), vec![(BLOCK, BLOCK)]);

    let (recent, average) = h.cache.hit_rate();
    assert_eq!(recent, 1.0);
    assert!((average - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_cached_read_completes_without_device_read() {
    let mut h = Harness::new(options(4));
    let (_, _) = h.read(10, 100);
    h.run();
    h.data_reads.clear();

    let (request, buffer) = h.read(20, 50);
    h.complete_metadata();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert!(h.queued.lock().is_empty());
    assert_eq!(buffer.to_vec(), h.expected(20, 50));
    assert!(h.data_reads.is_empty());
}

#[test]
fn test_concurrent_sections_share_one_read() {
    let mut h = Harness::new(options(4));
    let (first, first_buffer) = h.read(10, 100);
    let (second, second_buffer) = h.read(500, 100);
    h.complete_metadata();

    assert_eq!(h.queued.lock().len(), 1);
    assert_eq!(h.cache.num_in_flight_requests(), 1);

    h.run();
    assert_eq!(h.ctx.status(first), Some(RequestStatus::Completed));
    assert_eq!(h.ctx.status(second), Some(RequestStatus::Completed));
    assert_eq!(first_buffer.to_vec(), h.expected(10, 100));
    assert_eq!(second_buffer.to_vec(), h.expected(500, 100));
    assert_eq!(h.data_reads, vec![(0, BLOCK)]);
}

#[test]
fn test_full_pool_delays_sections() {
    let mut h = Harness::new(options(1));
    let (first, first_buffer) = h.read(10, 100);
    let (second, second_buffer) = h.read(5000, 100);
    h.complete_metadata();

    assert_eq!(h.cache.num_in_flight_requests(), 1);
    assert_eq!(h.cache.num_delayed_sections(), 1);
    assert_eq!(h.cache.available_slots(), -1);
    assert!(!h.ctx.status(second).unwrap().is_terminal());

    let mut pending = Vec::new();
    let now = h.ctx.now();
    h.cache.update_completion_estimates(&mut h.ctx, now, &mut pending);
    assert_eq!(pending, vec![second]);

    h.run();
    assert_eq!(h.ctx.status(first), Some(RequestStatus::Completed));
    assert_eq!(h.ctx.status(second), Some(RequestStatus::Completed));
    assert_eq!(first_buffer.to_vec(), h.expected(10, 100));
    assert_eq!(second_buffer.to_vec(), h.expected(5000, 100));
    assert_eq!(h.data_reads, vec![(0, BLOCK), (BLOCK, BLOCK)]);
    assert_eq!(h.cache.num_delayed_sections(), 0);
    assert_eq!(h.cache.available_slots(), 1);
}

#[test]
fn test_flush_while_read_in_flight() {
    let mut h = Harness::new(options(4));
    let path = h.path();
    let (request, buffer) = h.read(10, 100);
    h.complete_metadata();
    assert_eq!(h.cache.num_in_flight_requests(), 1);

    h.cache.flush_cache(&path);
    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), None);

    h.run();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(10, 100));
    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), None);
    assert!(h.cache.block(0).unwrap().owner().is_none());
    assert_eq!(h.cache.num_in_flight_requests(), 0);
}

#[test]
fn test_flush_commands_are_forwarded() {
    let mut h = Harness::new(options(4));
    let path = h.path();
    h.read(10, 100);
    h.run();
    assert!(h.cache.find_in_cache(&path, 0).unwrap().is_some());

    let flush = h.queue(Command::Flush(FlushData { path: path.clone() }));
    assert_eq!(h.pop_queued(), Some(flush));
    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), None);

    h.read(BLOCK + 10, 100);
    h.run();
    let flush_all = h.queue(Command::FlushAll);
    assert_eq!(h.pop_queued(), Some(flush_all));
    assert_eq!(h.cache.find_in_cache(&path, BLOCK).unwrap(), None);
}

#[test]
fn test_failed_cache_read_drops_block() {
    let mut h = Harness::new(options(4));
    let path = h.path();
    let (request, _) = h.read(10, 100);
    h.complete_metadata();

    let read = h.pop_queued().unwrap();
    h.complete(read, false);
    h.ctx.finalize_completed_requests();

    assert_eq!(h.ctx.status(request), Some(RequestStatus::Failed));
    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), None);
    assert_eq!(h.cache.num_in_flight_requests(), 0);

    let (retry, buffer) = h.read(10, 100);
    h.run();
    assert_eq!(h.ctx.status(retry), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(10, 100));
}

#[test]
fn test_failed_read_fails_every_waiter() {
    let mut h = Harness::new(options(4));
    let (first, _) = h.read(10, 100);
    let (second, _) = h.read(500, 100);
    h.complete_metadata();

    let read = h.pop_queued().unwrap();
    h.complete(read, false);
    h.ctx.finalize_completed_requests();

    assert_eq!(h.ctx.status(first), Some(RequestStatus::Failed));
    assert_eq!(h.ctx.status(second), Some(RequestStatus::Failed));
}

#[test]
fn test_read_without_next_stage_fails() {
    let mut cache = BlockCache::new(options(4)).unwrap();
    let mut ctx = StreamerContext::new();
    let request = ctx.create_external_request(Command::Read(ReadData {
        output: OutputTarget::new(SharedBuffer::new(100)),
        output_size: 100,
        path: RequestPath::new("a.bin"),
        offset: 0,
        size: 100,
        shared_read: false,
    }));

    cache.queue_request(&mut ctx, request);
    ctx.finalize_completed_requests();
    assert_eq!(ctx.status(request), Some(RequestStatus::Failed));
}

#[test]
fn test_unknown_file_size_reads_uncached() {
    let mut h = Harness::new(options(4));
    let (request, buffer) = h.read(10, 100);

    let metadata = h.pop_queued().unwrap();
    h.complete(metadata, false);
    h.ctx.finalize_completed_requests();

    assert_eq!(h.pop_queued(), Some(request));
    assert_eq!(h.cache.num_metadata_retrievals_in_progress(), 0);
    h.complete(request, true);
    h.ctx.finalize_completed_requests();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(10, 100));
    assert_eq!(h.cache.find_in_cache(&h.path(), 0).unwrap(), None);
}

#[test]
fn test_epilog_only_merges_prolog_into_main() {
    let mut h = Harness::new(options(4).only_epilog_writes(true));
    let path = h.path();
    let (request, buffer) = h.read(100, 12000);
    h.run();

    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(100, 12000));
    assert_eq!(h.sorted_reads(), vec![(100, 2 * BLOCK - 100), (2 * BLOCK, BLOCK)]);
    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), None);
    assert!(h.cache.find_in_cache(&path, 2 * BLOCK).unwrap().is_some());
}

#[test]
fn test_epilog_only_prolog_becomes_plain_read() {
    let mut h = Harness::new(options(4).only_epilog_writes(true));
    let (request, buffer) = h.read(100, 5000);
    h.run();

    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert_eq!(buffer.to_vec(), h.expected(100, 5000));
    assert_eq!(h.sorted_reads(), vec![(100, BLOCK - 100), (BLOCK, BLOCK)]);
}

#[test]
fn test_single_block_cache_forces_epilog_only() {
    let h = Harness::new(options(1));
    assert!(h.cache.only_epilog_writes());
    let h = Harness::new(options(2));
    assert!(!h.cache.only_epilog_writes());
}

#[test]
fn test_aligned_reads_are_forwarded_unmodified() {
    let mut h = Harness::new(options(4));
    let (request, _) = h.read(0, 2 * BLOCK);
    h.complete_metadata();
    assert_eq!(h.pop_queued(), Some(request));

    // Aligned read running to the end of the file.
    let tail = 4 * BLOCK;
    let (request, _) = h.read(tail, FILE_LEN as u64 - tail);
    h.complete_metadata();
    assert_eq!(h.pop_queued(), Some(request));
    assert_eq!(h.cache.cacheable_rate(), 0.0);
}

#[test]
fn test_invalid_reads_fail() {
    let mut h = Harness::new(options(4));

    let request = h.queue(Command::Read(ReadData {
        output: OutputTarget::new(SharedBuffer::new(100)),
        output_size: 50,
        path: h.path(),
        offset: 0,
        size: 100,
        shared_read: false,
    }));
    h.complete_metadata();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Failed));

    let (request, _) = h.read(FILE_LEN as u64 - 10, 100);
    h.complete_metadata();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Failed));

    let (request, _) = h.read(10, 0);
    h.complete_metadata();
    assert_eq!(h.ctx.status(request), Some(RequestStatus::Completed));
    assert!(h.data_reads.is_empty());
}

#[test]
fn test_least_recently_used_block_is_evicted() {
    let mut h = Harness::new(options(2));
    let path = h.path();

    h.read(10, 100);
    h.run();
    h.clock.advance(Duration::from_millis(1));
    h.read(BLOCK + 10, 100);
    h.run();
    h.clock.advance(Duration::from_millis(1));
    h.read(20, 10);
    h.run();
    h.clock.advance(Duration::from_millis(1));
    h.read(2 * BLOCK + 10, 100);
    h.run();

    assert_eq!(h.cache.find_in_cache(&path, 0).unwrap(), Some(0));
    assert_eq!(h.cache.find_in_cache(&path, BLOCK).unwrap(), None);
    assert_eq!(h.cache.find_in_cache(&path, 2 * BLOCK).unwrap(), Some(1));
}

#[test]
fn test_status_reflects_outstanding_work() {
    let mut h = Harness::new(options(4));
    let mut status = Status::default();
    h.cache.update_status(&mut status);
    assert_eq!(status, Status { num_available_slots: 4, is_idle: true });

    h.read(10, 100);
    let mut status = Status::default();
    h.cache.update_status(&mut status);
    assert_eq!(status.num_available_slots, 3);
    assert!(!status.is_idle);

    h.run();
    let mut status = Status::default();
    h.cache.update_status(&mut status);
    assert_eq!(status, Status { num_available_slots: 4, is_idle: true });
}

#[test]
fn test_statistics() {
    let mut h = Harness::new(options(4));
    h.read(10, 100);
    h.run();
    h.read(10, 100);
    h.run();

    let mut statistics = Vec::new();
    h.cache.collect_statistics(&mut statistics);
    match stats::find(&statistics, "Block cache", "Cache hit rate").map(|s| &s.value) {
        Some(StatisticValue::PercentageRange { average, minimum, maximum }) => {
            assert!((average - 0.5).abs() < f64::EPSILON);
            assert_eq!(*minimum, 0.0);
            assert_eq!(*maximum, 1.0);
        }
        other => panic!("unexpected hit rate {:?}", other),
    }
    assert_eq!(
        stats::find(&statistics, "Block cache", "Available slots").map(|s| &s.value),
        Some(&StatisticValue::Integer(4))
    );
    assert!(stats::find(&statistics, "Block cache", "Cacheable").is_some());
    assert!(stats::find(&statistics, "Fake drive", "Queued").is_some());
}

#[test]
fn test_reports() {
    let mut h = Harness::new(options(4));
    h.read(10, 100);
    h.run();

    let config = ReportData::new(ReportType::Config);
    let request = h.queue(Command::Report(config.clone()));
    assert_eq!(h.pop_queued(), Some(request));
    {
        let output = config.output.lock();
        assert_eq!(
            stats::find(&output, "Block cache", "Blocks").map(|s| &s.value),
            Some(&StatisticValue::Integer(4))
        );
        assert_eq!(
            stats::find(&output, "Block cache", "Next node").map(|s| &s.value),
            Some(&StatisticValue::Text("Fake drive".to_string()))
        );
    }

    let files = ReportData::new(ReportType::CachedFiles);
    h.queue(Command::Report(files.clone()));
    let output = files.output.lock();
    assert_eq!(
        stats::find(&output, "Block cache", "Cached file").map(|s| &s.value),
        Some(&StatisticValue::Text("a.bin".to_string()))
    );
}

#[test]
fn test_pool_memory_returned_to_allocator() {
    let allocator = Arc::new(BoundedAllocator::new(6 * BLOCK as usize));
    let clock = Arc::new(ManualClock::new());

    let cache = BlockCache::with_dependencies(options(4), clock.clone(), allocator.clone()).unwrap();
    assert_eq!(allocator.used(), 4 * BLOCK as usize);

    let result = BlockCache::with_dependencies(options(4), clock, allocator.clone());
    assert!(matches!(result, Err(Error::AllocationFailed { .. })));

    drop(cache);
    assert_eq!(allocator.used(), 0);
}
