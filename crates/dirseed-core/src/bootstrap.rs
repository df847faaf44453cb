//! Skip-verification bootstrap.
//!
//! For a freshly admitted job with no resume entry, and only when the
//! operator opted in, mark every segment complete and nothing pending so
//! the engine trusts the data already on disk instead of hashing it.

use crate::bitmap::SegmentBitmap;
use crate::engine::{EngineError, JobEngine, JobHandle};
use crate::resume_store::ResumeLookup;

/// True when the bootstrap may run: opted in and the store reported a clean
/// "no entry". A found blob or an unreadable index never qualifies.
pub fn should_bootstrap(skip_verification: bool, lookup: &ResumeLookup) -> bool {
    skip_verification && *lookup == ResumeLookup::Absent
}

/// Hand the engine a fully-complete, nothing-pending state for `job`.
pub fn apply_skip_verification(engine: &dyn JobEngine, job: &JobHandle) -> Result<(), EngineError> {
    let segments = engine.segment_count(job)?;
    let completed = SegmentBitmap::full(segments);
    let pending = SegmentBitmap::new(segments);
    engine.set_completion_bitmap(job, &completed, &pending)?;
    tracing::info!(job = %job, segments, "skip-verification: marked all segments complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{JobSettings, MemoryEngine};
    use std::path::Path;

    #[test]
    fn only_absent_lookup_qualifies() {
        assert!(should_bootstrap(true, &ResumeLookup::Absent));
        assert!(!should_bootstrap(false, &ResumeLookup::Absent));
        assert!(!should_bootstrap(true, &ResumeLookup::Found(vec![1])));
        assert!(!should_bootstrap(true, &ResumeLookup::Unavailable));
    }

    #[test]
    fn marks_every_segment_complete_and_none_pending() {
        let engine = MemoryEngine::new();
        engine.insert_descriptor("/w/big.torrent", vec![1u8; 64 * 10 + 1]);
        let d = engine.load_descriptor(Path::new("/w/big.torrent")).unwrap();
        let job = engine
            .create_job(&d, Path::new("/data"), &JobSettings::default())
            .unwrap();

        apply_skip_verification(&engine, &job).unwrap();

        let n = engine.segment_count(&job).unwrap();
        assert_eq!(n, 11);
        let (completed, pending) = engine.bitmaps(&job).unwrap();
        assert!(completed.all_set(n));
        assert!(pending.none_set(n));
    }
}
