//! Integration tests for the process-wide kind table.

use exscope::{
    kind::{declare_kind, is_a, registry, ErrorKind, KindSlot, FIRST_USER_KIND},
    Error, Result,
};

static ROOT: KindSlot = KindSlot::new();
static A: KindSlot = KindSlot::new();
static B: KindSlot = KindSlot::new();
static C: KindSlot = KindSlot::new();

static LATE_PARENT: KindSlot = KindSlot::new();
static EARLY_CHILD: KindSlot = KindSlot::new();

fn declare_tree() -> Result<[ErrorKind; 4]> {
    Ok([
        declare_kind(&ROOT, &ROOT, "Root", "root failure")?,
        declare_kind(&A, &ROOT, "A", "a failure")?,
        declare_kind(&B, &A, "B", "b failure")?,
        declare_kind(&C, &A, "C", "c failure")?,
    ])
}

#[test]
fn test_every_kind_is_itself() -> Result<()> {
    for kind in declare_tree()? {
        assert!(is_a(kind, kind)?);
    }
    Ok(())
}

#[test]
fn test_ancestry() -> Result<()> {
    let [root, a, b, c] = declare_tree()?;

    assert!(is_a(b, root)?);
    assert!(is_a(c, a)?);
    assert!(!is_a(c, b)?);
    assert!(!is_a(root, b)?);
    assert!(!is_a(a, c)?);
    Ok(())
}

#[test]
fn test_user_kinds_are_separate_from_reserved_kinds() -> Result<()> {
    let [root, ..] = declare_tree()?;

    assert!(root.id() >= FIRST_USER_KIND);
    for reserved in [
        ErrorKind::ILLEGAL_ESCAPE,
        ErrorKind::STACK_EXHAUSTED,
        ErrorKind::STACK_CORRUPTED,
    ] {
        assert!(!is_a(reserved, root)?);
        assert!(!is_a(root, reserved)?);
        assert_eq!(registry().parent(reserved)?, reserved);
    }
    Ok(())
}

#[test]
fn test_names_and_messages() -> Result<()> {
    let [_, a, ..] = declare_tree()?;
    assert_eq!(registry().name(a), "A");
    assert_eq!(registry().default_message(a), "a failure");
    assert_eq!(registry().name(ErrorKind::STACK_EXHAUSTED), "StackExhausted");
    Ok(())
}

#[test]
fn test_parent_declared_after_child() -> Result<()> {
    let child = declare_kind(&EARLY_CHILD, &LATE_PARENT, "EarlyChild", "")?;
    let parent = declare_kind(&LATE_PARENT, &LATE_PARENT, "LateParent", "late")?;

    assert!(is_a(child, parent)?);
    assert_eq!(registry().name(parent), "LateParent");
    assert_eq!(registry().parent(parent)?, parent);
    Ok(())
}

#[test]
fn test_sentinels_and_unknown_ids_are_rejected() -> Result<()> {
    let [root, ..] = declare_tree()?;

    assert_eq!(ErrorKind::from_raw(0), None);
    assert_eq!(ErrorKind::from_raw(1), None);

    let beyond = ErrorKind::from_raw(u32::MAX).ok_or(Error::KindNotRegistered)?;
    assert_eq!(is_a(root, beyond), Err(Error::KindOutOfBounds(u32::MAX)));
    Ok(())
}

#[test]
fn test_concurrent_readers() -> Result<()> {
    let [root, _, b, c] = declare_tree()?;

    let readers: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(move || (0..1000).all(|_| is_a(b, root) == Ok(true) && is_a(c, b) == Ok(false))))
        .collect();
    for reader in readers {
        assert!(reader.join().unwrap_or(false));
    }
    Ok(())
}
