use std::rc::Rc;

use facet_opcode::{EncodeError, EncodeOptions, Encoder, ProgramCache, shaped_struct, to_string};
use facet_testhelpers::IPanic;

shaped_struct! {
    struct Node {
        #[json("value")]
        value: i32,
        #[json("next", OMIT_EMPTY)]
        next: Option<Box<Node>>,
    }
}

fn list(values: &[i32]) -> Option<Box<Node>> {
    values.iter().rev().fold(None, |next, &value| {
        Some(Box::new(Node { value, next }))
    })
}

#[test]
fn linked_list_terminates() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let head = list(&[1, 2, 3]);
    assert_eq!(
        to_string(&head)?,
        r#"{"value":1,"next":{"value":2,"next":{"value":3}}}"#
    );
    Ok(())
}

#[test]
fn self_reference_compiles_each_reach_once() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let cache = ProgramCache::new();
    let encoder = Encoder::new(&cache);
    let head = list(&[1, 2]);

    // Root `Option<Box<Node>>` is Node reached through two hops; `next`
    // points back at Node at level zero.
    encoder.to_vec(&head)?;
    assert_eq!(cache.compile_count(), 2);
    encoder.to_vec(&head)?;
    assert_eq!(cache.compile_count(), 2);
    Ok(())
}

#[test]
fn nesting_limit_is_enforced() {
    facet_testhelpers::setup();
    let head = list(&(0..10).collect::<Vec<_>>());
    let cache = ProgramCache::new();
    let encoder = Encoder::new(&cache).options(EncodeOptions::default().max_depth(4));
    let err = encoder.to_string(&head).unwrap_err();
    assert!(
        matches!(err, EncodeError::UnsupportedValue { type_name, .. } if type_name.ends_with("Node")),
        "{err}"
    );

    let encoder = Encoder::new(&cache).options(EncodeOptions::default().max_depth(10));
    assert!(encoder.to_string(&head).is_ok());
}

#[test]
fn lists_nest_right_up_to_the_default_limit() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let depth = EncodeOptions::default().max_depth;
    let values: Vec<i32> = (0..depth as i32).collect();
    let json = to_string(&list(&values))?;
    assert!(json.starts_with(r#"{"value":0,"next":{"value":1,"next":"#), "{json:.64}");
    let innermost = format!(r#"{{"value":{}}}"#, depth - 1);
    assert!(json.ends_with(&format!("{innermost}{}", "}".repeat(depth - 1))));
    assert_eq!(json.matches('{').count(), depth);
    Ok(())
}

#[test]
fn one_level_past_the_default_limit_is_refused() {
    facet_testhelpers::setup();
    let depth = EncodeOptions::default().max_depth;
    let values: Vec<i32> = (0..=depth as i32).collect();
    let err = to_string(&list(&values)).unwrap_err();
    assert!(
        matches!(err, EncodeError::UnsupportedValue { type_name, .. } if type_name.ends_with("Node")),
        "{err}"
    );
}

#[test]
fn deep_values_encode_on_a_small_stack() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let depth = EncodeOptions::default().max_depth;
    let head = list(&(0..depth as i32).collect::<Vec<_>>());
    let json = std::thread::scope(|scope| {
        std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn_scoped(scope, || to_string(&head))
            .expect("spawn encoder thread")
            .join()
            .expect("encoder thread panicked")
    })?;
    assert_eq!(json.matches('{').count(), depth);
    Ok(())
}

shaped_struct! {
    struct Tree {
        #[json("name")]
        name: String,
        #[json("children", OMIT_EMPTY)]
        children: Vec<Tree>,
    }
}

#[test]
fn recursion_through_a_sequence() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let tree = Tree {
        name: "root".to_string(),
        children: vec![
            Tree {
                name: "left".to_string(),
                children: vec![],
            },
            Tree {
                name: "right".to_string(),
                children: vec![Tree {
                    name: "leaf".to_string(),
                    children: vec![],
                }],
            },
        ],
    };
    assert_eq!(
        to_string(&tree)?,
        r#"{"name":"root","children":[{"name":"left"},{"name":"right","children":[{"name":"leaf"}]}]}"#
    );
    Ok(())
}

/// A chain of `levels` trees, each the only child of the one above.
fn spine(levels: usize) -> Tree {
    let mut tree = Tree {
        name: "leaf".to_string(),
        children: vec![],
    };
    for _ in 1..levels {
        tree = Tree {
            name: "branch".to_string(),
            children: vec![tree],
        };
    }
    tree
}

#[test]
fn deep_sequences_share_the_limit() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    // Every level opens an object and, above the leaf, an array: 500 levels
    // nest 999 deep.
    let json = to_string(&spine(500))?;
    assert_eq!(json.matches('[').count(), 499);
    assert!(json.ends_with(&format!(r#"{{"name":"leaf"}}{}"#, "]}".repeat(499))));

    let err = to_string(&spine(501)).unwrap_err();
    assert!(matches!(err, EncodeError::UnsupportedValue { .. }), "{err}");
    Ok(())
}

shaped_struct! {
    struct Ping {
        #[json("n")]
        n: u8,
        #[json("pong", OMIT_EMPTY)]
        pong: Option<Rc<Pong>>,
    }
}

shaped_struct! {
    struct Pong {
        #[json("n")]
        n: u8,
        #[json("ping", OMIT_EMPTY)]
        ping: Option<Rc<Ping>>,
    }
}

#[test]
fn mutual_recursion_through_shared_pointers() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let tail = Rc::new(Ping { n: 3, pong: None });
    let middle = Rc::new(Pong {
        n: 2,
        ping: Some(Rc::clone(&tail)),
    });
    let head = Ping {
        n: 1,
        pong: Some(middle),
    };
    assert_eq!(
        to_string(&head)?,
        r#"{"n":1,"pong":{"n":2,"ping":{"n":3}}}"#
    );
    Ok(())
}
