//! End-to-end scenarios: a three-level taxonomy, a traced raise, and a loop that leaves
//! an explicit region with `break`.

use std::{cell::Cell, sync::Once};

use exscope::{
    config::RuntimeConfig,
    enter_region,
    frames::FrameInfo,
    kind::{declare_kind, is_a, KindSlot},
    raise,
    region::protect,
    thread, traced, Result,
};

static ROOT: KindSlot = KindSlot::new();
static GENERIC: KindSlot = KindSlot::new();
static BREAK_MISUSE: KindSlot = KindSlot::new();

static SETUP: Once = Once::new();

fn setup() {
    SETUP.call_once(|| {
        declare_kind(&ROOT, &ROOT, "Root", "root").expect("declare Root");
        declare_kind(&GENERIC, &ROOT, "Generic", "generic failure").expect("declare Generic");
        declare_kind(&BREAK_MISUSE, &GENERIC, "BreakMisuse", "break inside a region")
            .expect("declare BreakMisuse");
        exscope::kind::seal();
        exscope::init(RuntimeConfig::default().with_escape_kind(&BREAK_MISUSE))
            .expect("install configuration");
    });
}

const QUX_RAISE_LINE: u32 = line!() + 2;
fn qux() -> u32 {
    raise!(GENERIC, "qux does throw!")
}

#[test]
fn test_taxonomy() -> Result<()> {
    setup();
    let (root, generic, misuse) = (
        ROOT.get().expect("Root"),
        GENERIC.get().expect("Generic"),
        BREAK_MISUSE.get().expect("BreakMisuse"),
    );

    assert!(is_a(misuse, generic)?);
    assert!(is_a(misuse, root)?);
    assert!(is_a(generic, root)?);
    assert!(!is_a(root, generic)?);
    assert!(declare_kind(&ROOT, &ROOT, "Again", "").is_err());
    Ok(())
}

#[test]
fn test_generic_raise_is_caught_with_trace() -> Result<()> {
    setup();
    let handle = thread::init()?;

    let (message, origin, trace) = protect(|| -> (String, FrameInfo, String) {
        traced!(qux());
        unreachable!("qux returned")
    })
    .catch(&GENERIC, |e| (e.message().to_string(), e.origin().clone(), e.trace()))
    .run();

    assert_eq!(message, "qux does throw!");
    assert_eq!(origin.function, "qux");
    assert_eq!(origin.line, QUX_RAISE_LINE);
    assert!(trace.starts_with(&format!("tests/scenario.rs: at line {QUX_RAISE_LINE} in qux\n")));
    assert!(thread::depths()?.is_empty());
    handle.shutdown()
}

#[test]
fn test_break_out_of_region_is_reported() -> Result<()> {
    setup();
    let handle = thread::init()?;
    let mut visited = Vec::new();

    let outcome = protect(|| {
        for item in 0..5 {
            let region = enter_region!("loop body");
            visited.push(item);
            if item == 2 {
                break;
            }
            region.end();
        }
        "completed"
    })
    .catch(&BREAK_MISUSE, |e| {
        assert!(e.message().contains("loop body"));
        "break misuse"
    })
    .run();

    assert_eq!(outcome, "break misuse");
    assert_eq!(visited, [0, 1, 2]);
    assert!(thread::depths()?.is_empty());
    handle.shutdown()
}

#[test]
fn test_escape_is_dropped_when_region_exits_by_exception() -> Result<()> {
    setup();
    let handle = thread::init()?;

    let first = protect(|| -> String {
        {
            let _region = enter_region!("abandoned");
        }
        raise!(GENERIC, "boom")
    })
    .catch(&GENERIC, |e| e.message().to_string())
    .run();
    let second = protect(|| "fine".to_string())
        .catch(&ROOT, |e| e.to_string())
        .run();

    assert_eq!(first, "boom");
    assert_eq!(second, "fine");
    assert!(thread::depths()?.is_empty());
    handle.shutdown()
}

#[test]
fn test_escape_is_reported_by_enclosing_region_only() -> Result<()> {
    setup();
    let handle = thread::init()?;
    let inner = Cell::new(None);

    let outer = protect(|| {
        {
            let _region = enter_region!();
        }
        inner.set(Some(protect(|| "inner").catch(&BREAK_MISUSE, |_| "inner reported").run()));
        "outer"
    })
    .catch(&BREAK_MISUSE, |_| "outer reported")
    .run();

    assert_eq!(inner.get(), Some("inner"));
    assert_eq!(outer, "outer reported");
    assert!(thread::depths()?.is_empty());
    handle.shutdown()
}

#[test]
fn test_escape_is_catchable_as_ancestor() -> Result<()> {
    setup();
    let handle = thread::init()?;

    let caught = protect(|| {
        protect(|| {
            let _region = enter_region!();
        })
        .run();
        false
    })
    .catch(&ROOT, |e| e.is_a(&BREAK_MISUSE))
    .run();

    assert!(caught);
    assert!(thread::depths()?.is_empty());
    handle.shutdown()
}

#[test]
fn test_closed_regions_in_loop_are_silent() -> Result<()> {
    setup();
    let handle = thread::init()?;

    let total = protect(|| {
        let mut total = 0;
        for item in 1..=10 {
            let region = enter_region!();
            total += item;
            region.end();
        }
        total
    })
    .catch(&BREAK_MISUSE, |_| -1)
    .run();

    assert_eq!(total, 55);
    handle.shutdown()
}
