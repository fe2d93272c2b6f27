use hsa_cts::soft::{self, SoftConfig, SoftRuntime};
use hsa_cts::{HsaContext, Runtime, Session, SharedRuntime, Signal, Status};
use serial_test::serial;
use std::sync::Arc;

fn global() -> SharedRuntime {
    soft::global()
}

#[test]
#[serial]
fn global_runtime_is_shared() {
    let first = Arc::clone(&soft::global());
    let second = soft::global();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
#[serial]
fn nested_sessions_on_the_global_runtime() {
    let rt = global();
    let outer = Session::open(&rt).unwrap();
    let signal = Signal::create(&rt, 5).unwrap();
    {
        let inner = Session::open(&rt).unwrap();
        inner.close().unwrap();
    }
    assert_eq!(
        signal.load().unwrap(),
        5,
        "inner shutdown released a live signal"
    );
    signal.destroy().unwrap();
    outer.close().unwrap();
    assert_eq!(
        rt.system_info().unwrap_err().status(),
        Status::NotInitialized
    );
}

#[test]
#[serial]
fn last_shutdown_releases_resources() {
    let rt = global();
    let session = Session::open(&rt).unwrap();
    let handle = rt.signal_create(1, &[]).unwrap();
    session.close().unwrap();

    let session = Session::open(&rt).unwrap();
    assert_eq!(
        rt.signal_destroy(handle).unwrap_err().status(),
        Status::InvalidSignal,
        "signal survived the end of its session"
    );
    session.close().unwrap();
}

#[test]
#[serial]
fn context_drop_shuts_down() {
    let rt = global();
    {
        let context = HsaContext::with_queue(&rt, 64).unwrap();
        assert!(context.queue.is_some());
        assert!(context.kernarg_region.is_some());
    }
    assert_eq!(rt.shut_down().unwrap_err().status(), Status::NotInitialized);
}

#[test]
fn refcount_ceiling_overflows() {
    let rt = SoftRuntime::new(SoftConfig::default().with_refcount_ceiling(3));
    for _ in 0..3 {
        rt.init().unwrap();
    }
    assert_eq!(rt.init().unwrap_err().status(), Status::RefcountOverflow);
    assert_eq!(rt.refcount(), 3);
    for _ in 0..3 {
        rt.shut_down().unwrap();
    }
    assert_eq!(rt.shut_down().unwrap_err().status(), Status::NotInitialized);
}
