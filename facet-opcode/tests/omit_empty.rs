use std::collections::BTreeMap;

use facet_opcode::{shaped_struct, to_string};
use facet_testhelpers::IPanic;

shaped_struct! {
    #[derive(Default)]
    struct Zeroes {
        #[json("n", OMIT_EMPTY)]
        n: u32,
        #[json("i", OMIT_EMPTY)]
        i: i64,
        #[json("f", OMIT_EMPTY)]
        f: f64,
        #[json("flag", OMIT_EMPTY)]
        flag: bool,
        #[json("s", OMIT_EMPTY)]
        s: String,
        #[json("c", OMIT_EMPTY)]
        c: char,
        #[json("list", OMIT_EMPTY)]
        list: Vec<u8>,
        #[json("map", OMIT_EMPTY)]
        map: BTreeMap<String, u8>,
    }
}

shaped_struct! {
    #[derive(Default)]
    struct Kept {
        #[json("n")]
        n: u32,
        #[json("flag")]
        flag: bool,
        #[json("s")]
        s: String,
        #[json("list")]
        list: Vec<u8>,
        #[json("map")]
        map: BTreeMap<String, u8>,
    }
}

#[test]
fn zero_values_are_omitted() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    assert_eq!(to_string(&Zeroes::default())?, "{}");
    Ok(())
}

#[test]
fn non_zero_values_are_kept() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let value = Zeroes {
        n: 1,
        i: -2,
        f: 0.5,
        flag: true,
        s: "s".to_string(),
        c: 'c',
        list: vec![0],
        map: BTreeMap::from([("k".to_string(), 0)]),
    };
    assert_eq!(
        to_string(&value)?,
        r#"{"n":1,"i":-2,"f":0.5,"flag":true,"s":"s","c":"c","list":[0],"map":{"k":0}}"#
    );
    Ok(())
}

#[test]
fn zero_values_without_the_flag_are_written() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    assert_eq!(
        to_string(&Kept::default())?,
        r#"{"n":0,"flag":false,"s":"","list":[],"map":{}}"#
    );
    Ok(())
}

shaped_struct! {
    struct Optionals {
        #[json("string_ptr", OMIT_EMPTY)]
        string_ptr: Option<Box<String>>,
        #[json("int_ptr", OMIT_EMPTY)]
        int_ptr: Option<Box<i64>>,
        #[json("bool_ptr", OMIT_EMPTY)]
        bool_ptr: Option<Box<bool>>,
        #[json("nested", OMIT_EMPTY)]
        nested: Option<Box<Pair>>,
        #[json("slice_ptr", OMIT_EMPTY)]
        slice_ptr: Option<Box<Vec<String>>>,
    }
}

shaped_struct! {
    struct Pair {
        #[json("a")]
        a: String,
        #[json("b", OMIT_EMPTY)]
        b: String,
    }
}

#[test]
fn all_absent_optionals_give_an_empty_object() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let value = Optionals {
        string_ptr: None,
        int_ptr: None,
        bool_ptr: None,
        nested: None,
        slice_ptr: None,
    };
    assert_eq!(to_string(&value)?, "{}");
    Ok(())
}

#[test]
fn present_optionals_are_written_even_when_zero() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let value = Optionals {
        string_ptr: Some(Box::new("test".to_string())),
        int_ptr: Some(Box::new(0)),
        bool_ptr: Some(Box::new(false)),
        nested: Some(Box::new(Pair {
            a: "nested_a".to_string(),
            b: "nested_b".to_string(),
        })),
        slice_ptr: Some(Box::new(vec!["a".into(), "b".into(), "c".into()])),
    };
    let json = to_string(&value)?;
    assert_eq!(
        json,
        r#"{"string_ptr":"test","int_ptr":0,"bool_ptr":false,"nested":{"a":"nested_a","b":"nested_b"},"slice_ptr":["a","b","c"]}"#
    );
    let parsed: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(parsed["slice_ptr"][2], "c");
    Ok(())
}

shaped_struct! {
    struct Nullable {
        #[json("name")]
        name: Option<String>,
        #[json("nested")]
        nested: Option<Option<u8>>,
        #[json("boxed")]
        boxed: Option<Box<Pair>>,
    }
}

#[test]
fn absent_values_without_the_flag_are_null() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let value = Nullable {
        name: None,
        nested: Some(None),
        boxed: None,
    };
    assert_eq!(
        to_string(&value)?,
        r#"{"name":null,"nested":null,"boxed":null}"#
    );

    let value = Nullable {
        name: Some("n".to_string()),
        nested: Some(Some(3)),
        boxed: Some(Box::new(Pair {
            a: String::new(),
            b: String::new(),
        })),
    };
    assert_eq!(
        to_string(&value)?,
        r#"{"name":"n","nested":3,"boxed":{"a":""}}"#
    );
    Ok(())
}

shaped_struct! {
    struct Level3 {
        #[json("value")]
        value: String,
        #[json("data", OMIT_EMPTY)]
        data: String,
    }
}

shaped_struct! {
    struct Level2 {
        #[json("l3", OMIT_EMPTY)]
        level3: Option<Box<Level3>>,
        #[json("value")]
        value: String,
    }
}

shaped_struct! {
    struct Level1 {
        #[json("l2", OMIT_EMPTY)]
        level2: Option<Box<Level2>>,
        #[json("value")]
        value: String,
    }
}

shaped_struct! {
    struct DeepNesting {
        #[json("l1", OMIT_EMPTY)]
        level1: Option<Box<Level1>>,
    }
}

#[test]
fn deep_nesting_with_every_level_present() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let deep = DeepNesting {
        level1: Some(Box::new(Level1 {
            level2: Some(Box::new(Level2 {
                level3: Some(Box::new(Level3 {
                    value: "deep".to_string(),
                    data: "nested".to_string(),
                })),
                value: "level2".to_string(),
            })),
            value: "level1".to_string(),
        })),
    };
    assert_eq!(
        to_string(&deep)?,
        r#"{"l1":{"l2":{"l3":{"value":"deep","data":"nested"},"value":"level2"},"value":"level1"}}"#
    );
    Ok(())
}

#[test]
fn deep_nesting_with_an_interior_gap() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let deep = DeepNesting {
        level1: Some(Box::new(Level1 {
            level2: Some(Box::new(Level2 {
                level3: None,
                value: "level2".to_string(),
            })),
            value: "level1".to_string(),
        })),
    };
    assert_eq!(
        to_string(&deep)?,
        r#"{"l1":{"l2":{"value":"level2"},"value":"level1"}}"#
    );
    Ok(())
}

shaped_struct! {
    struct FirstOmitted {
        #[json("a", OMIT_EMPTY)]
        a: Option<u8>,
        #[json("b")]
        b: u8,
        #[json("c", OMIT_EMPTY)]
        c: Option<u8>,
    }
}

#[test]
fn separators_only_between_written_fields() -> Result<(), IPanic> {
    facet_testhelpers::setup();
    let value = FirstOmitted {
        a: None,
        b: 2,
        c: None,
    };
    assert_eq!(to_string(&value)?, r#"{"b":2}"#);
    let value = FirstOmitted {
        a: Some(1),
        b: 2,
        c: Some(3),
    };
    assert_eq!(to_string(&value)?, r#"{"a":1,"b":2,"c":3}"#);
    Ok(())
}
