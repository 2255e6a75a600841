//! Integration tests for placealloc.

use placealloc::{
    kb, AllocConfig, AllocError, AllocatorFacade, CollectingSink, DeviceBackend, Place, SinkGuard, Stream,
    SystemMemory,
};
use std::sync::Arc;
use std::thread;

const GPU: Place = Place::Accelerator(0);

fn facade() -> AllocatorFacade {
    AllocatorFacade::new(AllocConfig::minimal())
}

#[test]
fn test_basic_host_allocation() {
    let facade = facade();

    let allocation = facade.alloc(Place::Host, 100).unwrap();
    assert_eq!(allocation.size(), 100);
    assert!(allocation.capacity() >= 100);
    assert_eq!(allocation.place(), Place::Host);
    assert_eq!(facade.base_ptr(&allocation), allocation.as_ptr());

    // Write to verify memory is usable
    unsafe {
        std::ptr::write_bytes(allocation.as_ptr(), 0x5A, allocation.size());
        assert_eq!(*allocation.as_ptr().add(99), 0x5A);
    }
}

#[test]
fn test_allocation_is_aligned() {
    let facade = AllocatorFacade::new(AllocConfig::minimal().with_alignment(256));

    for place in [Place::Host, Place::PinnedHost, GPU] {
        let allocation = facade.alloc(place, 48).unwrap();
        assert_eq!(allocation.as_ptr() as usize % 256, 0, "{}", place);
    }
}

#[test]
fn test_round_trip_makes_no_second_driver_call() {
    let facade = facade();

    for place in [Place::Host, Place::PinnedHost, GPU] {
        let first = facade.alloc(place, 3000).unwrap();
        let ptr = first.as_ptr();
        drop(first);

        let second = facade.alloc(place, 3000).unwrap();
        assert_eq!(second.as_ptr(), ptr, "{}", place);
        assert_eq!(facade.place_stats(place).unwrap().backend.alloc_calls, 1, "{}", place);
    }
}

#[test]
fn test_zero_sized_allocation() {
    let facade = facade();

    for place in [Place::Host, GPU] {
        let allocation = facade.alloc(place, 0).unwrap();
        assert_eq!(allocation.size(), 0);
        assert!(allocation.capacity() > 0);
    }
}

#[test]
fn test_distinct_accelerator_allocations() {
    let facade = facade();

    let a = facade.alloc(GPU, 1024).unwrap();
    let b = facade.alloc(GPU, 1024).unwrap();
    assert_ne!(a.as_ptr(), b.as_ptr());
    assert!(!a.overlaps(&b));

    drop(a);
    drop(b);
    assert!(facade.release(GPU) >= 2048);
}

#[test]
fn test_second_release_reclaims_nothing() {
    let facade = facade();

    for place in [Place::Host, Place::PinnedHost, GPU] {
        drop(facade.alloc(place, 4096).unwrap());
        assert!(facade.release(place) > 0, "{}", place);
        assert_eq!(facade.release(place), 0, "{}", place);
    }
    assert_eq!(facade.release(Place::Accelerator(7)), 0);
}

#[test]
fn test_release_keeps_live_allocations() {
    let facade = facade();

    let live = facade.alloc(GPU, 2048).unwrap();
    drop(facade.alloc(GPU, 1024).unwrap());

    assert_eq!(facade.release(GPU), 1024);
    let stats = facade.place_stats(GPU).unwrap();
    assert_eq!(stats.backend.in_use, 2048);
    assert_eq!(stats.strategies.in_use_bytes, live.capacity());
}

#[test]
fn test_invalid_places() {
    let sink = Arc::new(CollectingSink::new());
    let _guard = SinkGuard::install(sink.clone());
    let facade = facade();

    let err = facade.alloc(Place::Accelerator(3), 64).unwrap_err();
    assert!(matches!(err, AllocError::InvalidPlace { place: Place::Accelerator(3), .. }));
    assert!(!err.is_recoverable());

    let other = Stream::ordered(Place::Accelerator(1), 0);
    assert!(matches!(
        facade.alloc_on(GPU, 64, other),
        Err(AllocError::InvalidPlace { .. })
    ));
    assert!(matches!(
        facade.alloc_on(Place::Host, 64, Stream::ordered(GPU, 0)),
        Err(AllocError::InvalidPlace { .. })
    ));

    assert!(sink.codes().iter().all(|code| *code == "PA002"));
    assert_eq!(facade.registered_strategies(), 0);
}

#[test]
fn test_custom_devices() {
    let facade = AllocatorFacade::new(AllocConfig::minimal().with_custom_device("npu", 2));
    let npu = Place::custom("npu", 1);
    let stream = Stream::ordered(npu, 4);

    let allocation = facade.alloc_on(npu, 100, stream).unwrap();
    assert_eq!(allocation.place(), npu);
    assert_eq!(facade.stream_of(&allocation), stream);

    assert!(facade.alloc(Place::custom("npu", 2), 100).is_err());
    assert!(facade.alloc(Place::custom("mlu", 0), 100).is_err());
}

#[test]
fn test_custom_provider() {
    let provider = |place: Place| -> Option<Arc<dyn DeviceBackend>> {
        match place {
            Place::Host => Some(Arc::new(SystemMemory::new(place, kb(64), 64))),
            _ => None,
        }
    };
    let facade = AllocatorFacade::with_provider(AllocConfig::minimal(), provider).unwrap();

    assert!(facade.alloc(Place::Host, 1000).is_ok());
    assert!(matches!(facade.alloc(GPU, 1000), Err(AllocError::InvalidPlace { .. })));
    assert!(matches!(
        facade.alloc(Place::Host, kb(128)),
        Err(AllocError::OutOfMemory { .. })
    ));
}

#[test]
fn test_out_of_memory_reports_place_and_size() {
    let sink = Arc::new(CollectingSink::new());
    let _guard = SinkGuard::install(sink.clone());
    let facade = AllocatorFacade::new(AllocConfig::minimal().with_device_capacity(kb(64)));

    let err = facade.alloc(GPU, kb(128)).unwrap_err();
    assert_eq!(
        err,
        AllocError::OutOfMemory {
            place: GPU,
            requested: kb(128)
        }
    );
    assert!(err.is_recoverable());
    assert_eq!(sink.codes(), vec!["PA001"]);
}

#[test]
fn test_out_of_memory_releases_sibling_streams() {
    let facade = AllocatorFacade::new(AllocConfig::minimal().with_device_capacity(kb(64)));
    let stream = Stream::ordered(GPU, 1);

    // The default-stream pool keeps the whole device cached.
    drop(facade.alloc(GPU, kb(64)).unwrap());

    let allocation = facade.alloc_on(GPU, kb(32), stream).unwrap();
    assert_eq!(allocation.size(), kb(32));
    assert_eq!(facade.place_stats(GPU).unwrap().strategies.retries, 1);
}

#[test]
fn test_out_of_memory_without_sibling_release() {
    let config = AllocConfig::minimal()
        .with_device_capacity(kb(64))
        .with_sibling_release(false);
    let facade = AllocatorFacade::new(config);

    drop(facade.alloc(GPU, kb(64)).unwrap());
    let err = facade.alloc_on(GPU, kb(32), Stream::ordered(GPU, 1)).unwrap_err();
    assert!(matches!(err, AllocError::OutOfMemory { .. }));

    // An explicit release makes room.
    assert_eq!(facade.release(GPU), kb(64));
    assert!(facade.alloc_on(GPU, kb(32), Stream::ordered(GPU, 1)).is_ok());
}

#[test]
fn test_shared_allocation_freed_once_across_threads() {
    let facade = facade();
    let shared = facade.alloc_shared(GPU, 1024).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let owner = shared.clone();
            thread::spawn(move || {
                assert_eq!(owner.size(), 1024);
                drop(owner);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = facade.place_stats(GPU).unwrap();
    assert_eq!(stats.strategies.deallocation_count, 0);
    assert_eq!(shared.owner_count(), 1);

    drop(shared);
    let stats = facade.place_stats(GPU).unwrap();
    assert_eq!(stats.strategies.deallocation_count, 1);
    assert_eq!(stats.strategies.in_use_bytes, 0);
}

#[test]
fn test_multithread_allocation() {
    let facade = facade();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let facade = facade.clone();
            thread::spawn(move || {
                let place = if t % 2 == 0 { Place::Host } else { GPU };
                for i in 0..200 {
                    let allocation = facade.alloc(place, 64 + (i % 7) * 100).unwrap();
                    assert_eq!(allocation.place(), place);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = facade.stats();
    assert_eq!(stats.in_use_bytes(), 0);
    assert_eq!(stats.active_allocations(), 0);
    assert_eq!(facade.registered_strategies(), 2);
}

#[test]
fn test_same_size_contention_keeps_gauges_consistent() {
    let facade = facade();

    for (place, size) in [(Place::Host, 100), (Place::PinnedHost, 1000), (GPU, 1000)] {
        let capacity = facade.alloc(place, size).unwrap().capacity();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let facade = facade.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        drop(facade.alloc(place, size).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = facade.place_stats(place).unwrap().strategies;
        assert_eq!(stats.in_use_bytes, 0, "{}", place);
        assert_eq!(stats.allocation_count, stats.deallocation_count, "{}", place);
        assert_eq!(stats.cached_bytes % capacity, 0, "{}", place);
        assert!(stats.cached_bytes >= capacity && stats.cached_bytes <= 9 * capacity, "{}", place);

        assert_eq!(facade.release(place), stats.cached_bytes);
        assert_eq!(facade.place_stats(place).unwrap().strategies.cached_bytes, 0);
    }
}

#[test]
fn test_exhausted_host_recovers_before_failing() {
    let facade = AllocatorFacade::new(AllocConfig::minimal().with_host_limit(kb(8)));

    drop(facade.alloc(Place::Host, kb(8)).unwrap());
    let allocation = facade.alloc(Place::Host, kb(4)).unwrap();
    assert_eq!(allocation.size(), kb(4));

    let stats = facade.place_stats(Place::Host).unwrap();
    assert_eq!(stats.strategies.retries, 1);
    assert_eq!(stats.strategies.name, "retry");

    // Nothing cached to give back: the limit holds.
    let err = facade.alloc(Place::Host, kb(8)).unwrap_err();
    assert_eq!(
        err,
        AllocError::OutOfMemory {
            place: Place::Host,
            requested: kb(8)
        }
    );
}

#[test]
fn test_stats() {
    let facade = facade();

    let host = facade.alloc(Place::Host, 100).unwrap();
    let gpu = facade.alloc(GPU, 1000).unwrap();

    let stats = facade.stats();
    assert_eq!(stats.places.len(), 2);
    assert_eq!(stats.in_use_bytes(), host.capacity() + gpu.capacity());
    assert_eq!(stats.active_allocations(), 2);
    assert!(facade.place_stats(Place::PinnedHost).is_none());

    drop(gpu);
    let gpu_stats = facade.place_stats(GPU).unwrap();
    assert_eq!(gpu_stats.strategies.cached_bytes, 1024);
    assert_eq!(gpu_stats.strategy_count, 1);
    assert!(!stats.to_string().is_empty());

    let _on_stream = facade.alloc_on(GPU, 64, Stream::ordered(GPU, 2)).unwrap();
    let gpu_stats = facade.place_stats(GPU).unwrap();
    assert_eq!(gpu_stats.strategy_count, 2);
    assert_eq!(gpu_stats.strategies.name, "stream-safe");
}

#[test]
fn test_config_validation() {
    let bad = AllocConfig::minimal().with_alignment(3);
    assert!(matches!(
        AllocatorFacade::try_new(bad),
        Err(AllocError::InvalidArgument(_))
    ));
}

#[test]
#[should_panic(expected = "invalid allocator configuration")]
fn test_new_panics_on_invalid_config() {
    AllocatorFacade::new(AllocConfig::minimal().with_alignment(3));
}

#[test]
fn test_teardown_reports_outstanding_work() {
    let sink = Arc::new(CollectingSink::new());
    let _guard = SinkGuard::install(sink.clone());
    let facade = facade();

    let live = facade.alloc(GPU, 512).unwrap();
    let parked = facade.alloc(GPU, 512).unwrap();
    facade.record_stream(&parked, Stream::ordered(GPU, 1));
    drop(parked);
    drop(facade.alloc(Place::Host, 64).unwrap());

    let survivor = facade.clone();
    let reclaimed = facade.teardown();
    assert_eq!(reclaimed, 128);
    assert_eq!(sink.codes(), vec!["PA201", "PA202"]);
    assert_eq!(survivor.registered_strategies(), 0);
    assert!(survivor.stats().places.is_empty());

    // Outstanding allocations stay valid after teardown.
    assert_eq!(live.size(), 512);
    drop(live);

    // A surviving clone starts over with fresh chains.
    drop(survivor.alloc(GPU, 512).unwrap());
    assert_eq!(survivor.registered_strategies(), 1);
}

#[test]
fn test_clean_teardown_is_silent() {
    let sink = Arc::new(CollectingSink::new());
    let _guard = SinkGuard::install(sink.clone());
    let facade = facade();

    drop(facade.alloc(GPU, 512).unwrap());
    assert_eq!(facade.teardown(), 512);
    assert!(sink.codes().is_empty());
}
