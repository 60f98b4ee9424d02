use std::collections::BTreeMap;

use facet_opcode::{Encoder, ProgramCache, Shaped, shaped_struct};
use facet_testhelpers::IPanic;

shaped_struct! {
    struct Item {
        #[json("a")]
        a: String,
        #[json("b", OMIT_EMPTY)]
        b: String,
    }
}

shaped_struct! {
    struct Detail {
        #[json("i")]
        i: Item,
        #[json("n")]
        n: u32,
    }
}

shaped_struct! {
    struct Envelope {
        #[json("detail", OMIT_EMPTY)]
        detail: Option<Box<Detail>>,
        #[json("index")]
        index: BTreeMap<String, Detail>,
    }
}

fn detail(a: &str, n: u32) -> Detail {
    Detail {
        i: Item {
            a: a.to_string(),
            b: String::new(),
        },
        n,
    }
}

fn envelope() -> Envelope {
    Envelope {
        detail: Some(Box::new(detail("boxed", 1))),
        index: BTreeMap::from([("k".to_string(), detail("inline", 2))]),
    }
}

#[test]
fn repeated_encodes_are_byte_identical() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let cache = ProgramCache::new();
    let encoder = Encoder::new(&cache);
    let first = encoder.to_vec(&envelope())?;
    let compiled = cache.compile_count();
    for _ in 0..10 {
        assert_eq!(encoder.to_vec(&envelope())?, first);
    }
    assert_eq!(cache.compile_count(), compiled);
    assert_eq!(
        String::from_utf8(first)?,
        r#"{"detail":{"i":{"a":"boxed"},"n":1},"index":{"k":{"i":{"a":"inline"},"n":2}}}"#
    );
    Ok(())
}

#[test]
fn each_reach_gets_its_own_programs() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let cache = ProgramCache::new();
    let encoder = Encoder::new(&cache);

    encoder.to_vec(&detail("x", 0))?;
    assert_eq!(cache.compile_count(), 2);

    // Same struct, reached through one more hop: new programs for Detail
    // and its embedded Item.
    encoder.to_vec(&Box::new(detail("x", 0)))?;
    assert_eq!(cache.compile_count(), 4);

    // Sequence elements start at level zero and reuse the first pair.
    encoder.to_vec(&vec![detail("x", 0)])?;
    assert_eq!(cache.compile_count(), 5);
    assert_eq!(cache.program_count(), 5);
    Ok(())
}

#[test]
fn disassembly_lists_reachable_programs() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let cache = ProgramCache::new();
    let listing = cache.disassemble(Envelope::SHAPE)?;
    let headers: Vec<&str> = listing
        .lines()
        .filter(|line| line.starts_with('p'))
        .collect();
    assert_eq!(headers.len(), 3, "{listing}");
    assert!(headers[0].starts_with("p0 object"), "{listing}");
    assert!(listing.contains("enter_nested"), "{listing}");
    assert!(listing.contains("encode_mapping"), "{listing}");
    Ok(())
}

#[test]
fn concurrent_first_use_compiles_once() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let sequential = ProgramCache::new();
    {
        let encoder = Encoder::new(&sequential);
        encoder.to_vec(&envelope())?;
        encoder.to_vec(&detail("x", 0))?;
    }

    let cache = ProgramCache::new();
    let expected = Encoder::new(&sequential).to_vec(&envelope())?;
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = &cache;
                scope.spawn(move || {
                    let encoder = Encoder::new(cache);
                    if i % 2 == 0 {
                        encoder.to_vec(&envelope()).map(Some)
                    } else {
                        encoder.to_vec(&detail("x", 0)).map(|_| None)
                    }
                })
            })
            .collect();
        for handle in handles {
            let bytes = handle.join().expect("encoder thread panicked");
            if let Some(bytes) = bytes.expect("encode failed") {
                assert_eq!(bytes, expected);
            }
        }
    });

    assert_eq!(cache.program_count(), sequential.program_count());
    assert_eq!(cache.shape_count(), sequential.shape_count());
    Ok(())
}
