use serde_json::{json, Value};
use tabula::{parse, JsonMap, Options};

fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect()
}

fn record(pairs: &[(&str, Value)]) -> JsonMap {
    let mut m = JsonMap::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v.clone());
    }
    m
}

fn teams_grid() -> Vec<Vec<String>> {
    grid(&[
        &["in:topic", "in:region", "out:team"],
        &["sports", "Europe", "Alice"],
        &["sports", "", "Bob"],
        &["", "", "Carol"],
    ])
}

#[test]
fn first_match_plain_strings() {
    let t = parse(teams_grid(), Options::default()).unwrap();

    let r = t.decide(&record(&[("topic", json!("sports")), ("region", json!("Europe"))]));
    assert_eq!(r, record(&[("team", json!("Alice"))]));

    let r = t.decide(&record(&[("topic", json!("sports")), ("region", json!("USA"))]));
    assert_eq!(r, record(&[("team", json!("Bob"))]));

    let r = t.decide(&record(&[("topic", json!("finance"))]));
    assert_eq!(r, record(&[("team", json!("Carol"))]));
}

#[test]
fn accumulate_no_predicates() {
    let mut g = teams_grid();
    g.insert(0, vec!["accumulate".to_string()]);
    let t = parse(g, Options::default()).unwrap();

    let r = t.decide(&record(&[("topic", json!("sports")), ("region", json!("Europe"))]));
    assert_eq!(r, record(&[("team", json!(["Alice", "Bob", "Carol"]))]));

    // A single picked row stays scalar.
    let r = t.decide(&record(&[("topic", json!("finance")), ("region", json!("USA"))]));
    assert_eq!(r, record(&[("team", json!("Carol"))]));

    // No picked rows: empty mapping.
    let g2 = grid(&[
        &["accumulate"],
        &["in:topic", "out:team"],
        &["sports", "Alice"],
    ]);
    let t2 = parse(g2, Options::default()).unwrap();
    assert!(t2.decide(&record(&[("topic", json!("finance"))])).is_empty());
}

#[test]
fn pattern_matcher_explicit() {
    let t = parse(
        grid(&[
            &["in:state", "out:level"],
            &["=~ ^hot|cold$", "extreme"],
        ]),
        Options::default(),
    )
    .unwrap();

    let r = t.decide(&record(&[("state", json!("hot"))]));
    assert_eq!(r, record(&[("level", json!("extreme"))]));
    assert!(t.decide(&record(&[("state", json!("warm"))])).is_empty());
}

#[test]
fn if_output_guard_gates_rows() {
    let t = parse(
        grid(&[
            &["in:x", "out:y", "if:"],
            &["1", "10", ":y == 10"],
            &["1", "20", ":y == 10"],
        ]),
        Options::default(),
    )
    .unwrap();
    // Row 0 is tested first and satisfies its own guard.
    assert_eq!(t.decide(&record(&[("x", json!(1))])), record(&[("y", json!(10))]));

    // When the first row's guard rejects, scanning resumes on the next row.
    let t = parse(
        grid(&[
            &["in:x", "out:y", "if:"],
            &["1", "20", ":y == 10"],
            &["1", "10", ":y == 10"],
        ]),
        Options::default(),
    )
    .unwrap();
    assert_eq!(t.decide(&record(&[("x", json!(1))])), record(&[("y", json!(10))]));

    // All rows rejected: empty result.
    let t = parse(
        grid(&[
            &["in:x", "out:y", "if:"],
            &["1", "20", ":y == 10"],
        ]),
        Options::default(),
    )
    .unwrap();
    assert!(t.decide(&record(&[("x", json!(1))])).is_empty());
}

fn country_grid(rows: usize) -> Vec<Vec<String>> {
    let countries = ["JP", "US", "DE", "BR"];
    let mut g = vec![vec!["in:country".to_string(), "in:qty".to_string(), "out:row".to_string()]];
    for i in 0..rows {
        g.push(vec![
            countries[i % countries.len()].to_string(),
            format!("<= {}", i),
            i.to_string(),
        ]);
    }
    g
}

#[test]
fn index_partitions_constant_key_column() {
    let t = parse(country_grid(1000), Options::default()).unwrap();
    let index = t.index.as_ref().expect("index should build");
    assert_eq!(index.columns, vec![0]);

    // Interleaved countries leave only isolated runs, one per JP row.
    let jp = index.lookup(&["JP".to_string()]).expect("JP ranges");
    assert_eq!(jp.len(), 250);
    for (start, end) in jp {
        assert!(end.is_none());
        assert_eq!(start % 4, 0);
    }

    // The first JP row whose qty predicate accepts 2 is row 4 (qty <= 4).
    let r = t.decide(&record(&[("country", json!("JP")), ("qty", json!(2))]));
    assert_eq!(r, record(&[("row", json!(4))]));

    // Unknown key: empty result, no scan.
    assert!(t.decide(&record(&[("country", json!("FR")), ("qty", json!(2))])).is_empty());
    // Missing key column: equally empty.
    assert!(t.decide(&record(&[("qty", json!(8))])).is_empty());
}

#[test]
fn indexed_and_linear_scans_agree() {
    let t = parse(country_grid(120), Options::default()).unwrap();
    assert!(t.index.is_some());

    for qty in [0, 3, 57, 119, 500] {
        let input = record(&[("country", json!("US")), ("qty", json!(qty))]);
        let picked = t.decide(&input);

        // Reference: a straight linear scan over the compiled rows.
        let parsed = tabula::input::parse_input(&t.columns, None, &input);
        let linear = (0..t.rows.len())
            .find(|&r| t.scan_rows[r].matches(&t.rows[r], &parsed))
            .map(|r| json!(r));
        match linear {
            Some(row) => assert_eq!(picked.get("row"), Some(&row)),
            None => assert!(picked.is_empty()),
        }
    }
}

#[test]
fn path_table_dispatches_per_group() {
    let g = grid(&[
        &["path:", "in:name", "out:greet"],
        &["user", "Ann", "hello user"],
        &["order", "", "ack order"],
    ]);
    let t = parse(g.clone(), Options::default()).unwrap();

    let input = record(&[
        ("user", json!({"name": "Ann"})),
        ("order", json!({"id": 7})),
    ]);
    // First non-empty group result wins in declaration order.
    assert_eq!(t.decide(&input), record(&[("greet", json!("hello user"))]));

    let input = record(&[
        ("user", json!({"name": "Bob"})),
        ("order", json!({"id": 7})),
    ]);
    assert_eq!(t.decide(&input), record(&[("greet", json!("ack order"))]));

    // Missing or non-mapping path values are skipped.
    let input = record(&[("user", json!("flat")), ("order", json!({"id": 7}))]);
    assert_eq!(t.decide(&input), record(&[("greet", json!("ack order"))]));
    assert!(t.decide(&record(&[("cart", json!({}))])).is_empty());

    // Accumulate merges group results into sequences.
    let mut accumulated = g;
    accumulated.insert(0, vec!["accumulate".to_string()]);
    let t = parse(accumulated, Options::default()).unwrap();
    let input = record(&[
        ("user", json!({"name": "Ann"})),
        ("order", json!({"id": 7})),
    ]);
    assert_eq!(t.decide(&input), record(&[("greet", json!(["hello user", "ack order"]))]));
}

#[test]
fn empty_cells_match_absent_keys() {
    let t = parse(
        grid(&[&["in:a", "in:b", "out:r"], &["", "1", "hit"]]),
        Options::default(),
    )
    .unwrap();
    // `a` is absent entirely; the empty cell still matches.
    assert_eq!(t.decide(&record(&[("b", json!(1))])), record(&[("r", json!("hit"))]));
}

#[test]
fn implicit_regexp_requires_option() {
    // Without regexp_implicit, `hot|cold` is a literal string constant.
    let t = parse(
        grid(&[&["in:state", "out:r"], &["hot|cold", "yes"]]),
        Options::default(),
    )
    .unwrap();
    assert!(t.decide(&record(&[("state", json!("hot"))])).is_empty());
    assert_eq!(
        t.decide(&record(&[("state", json!("hot|cold"))])),
        record(&[("r", json!("yes"))])
    );

    let t = parse(
        grid(&[&["in:state", "out:r"], &["hot|cold", "yes"]]),
        Options { regexp_implicit: true, ..Options::default() },
    )
    .unwrap();
    assert_eq!(t.decide(&record(&[("state", json!("hot"))])), record(&[("r", json!("yes"))]));
}

#[test]
fn duplicate_in_names_contribute_independent_predicates() {
    let t = parse(
        grid(&[
            &["in:x", "in:x", "out:band"],
            &["> 5", "< 10", "mid"],
        ]),
        Options::default(),
    )
    .unwrap();
    assert_eq!(t.decide(&record(&[("x", json!(7))])), record(&[("band", json!("mid"))]));
    assert!(t.decide(&record(&[("x", json!(12))])).is_empty());
    assert!(t.decide(&record(&[("x", json!(3))])).is_empty());
}

#[test]
fn guard_columns_test_the_whole_record() {
    let t = parse(
        grid(&[
            &["in:product", "guard:", "out:desk"],
            &["stock", ":country == 'US'", "nyse"],
            &["stock", "", "global"],
        ]),
        Options::default(),
    )
    .unwrap();
    let r = t.decide(&record(&[("product", json!("stock")), ("country", json!("US"))]));
    assert_eq!(r, record(&[("desk", json!("nyse"))]));
    let r = t.decide(&record(&[("product", json!("stock")), ("country", json!("JP"))]));
    assert_eq!(r, record(&[("desk", json!("global"))]));
}

#[test]
fn symbol_output_copies_input_fields_and_multi_result_sequences() {
    let g = grid(&[
        &["accumulate"],
        &["in:qty", "out:origin", "out:tag"],
        &["> 0", ":country", "pos"],
        &["> 10", ":country", "big"],
    ]);
    let t = parse(g, Options::default()).unwrap();
    assert!(t.outs_functions);

    let r = t.decide(&record(&[("qty", json!(25)), ("country", json!("JP"))]));
    assert_eq!(
        r,
        record(&[("origin", json!(["JP", "JP"])), ("tag", json!(["pos", "big"]))])
    );

    // Only one row picked: producers still run, result stays scalar.
    let r = t.decide(&record(&[("qty", json!(5)), ("country", json!("DE"))]));
    assert_eq!(r, record(&[("origin", json!("DE")), ("tag", json!("pos"))]));
}

#[test]
fn typed_constants_and_numeric_coercion() {
    let t = parse(
        grid(&[
            &["in:flag", "in:qty", "out:r"],
            &[":= true", "5", "exact"],
        ]),
        Options::default(),
    )
    .unwrap();
    // Numeric input 5 and cell `5` agree through the canonical form.
    let r = t.decide(&record(&[("flag", json!(true)), ("qty", json!(5))]));
    assert_eq!(r, record(&[("r", json!("exact"))]));
    let r = t.decide(&record(&[("flag", json!(true)), ("qty", json!("5"))]));
    assert_eq!(r, record(&[("r", json!("exact"))]));
    assert!(t.decide(&record(&[("flag", json!(false)), ("qty", json!(5))])).is_empty());
}

#[test]
fn set_defaults_feed_the_scan() {
    let t = parse(
        grid(&[
            &["set/nil:region", "in:topic", "in:region", "out:team"],
            &["Europe", "sports", "Europe", "Alice"],
            &["", "sports", "Asia", "Mei"],
        ]),
        Options::default(),
    )
    .unwrap();
    // Absent region defaults to Europe and matches row 0.
    let r = t.decide(&record(&[("topic", json!("sports"))]));
    assert_eq!(r, record(&[("team", json!("Alice"))]));
    // Provided region wins over the default.
    let r = t.decide(&record(&[("topic", json!("sports")), ("region", json!("Asia"))]));
    assert_eq!(r, record(&[("team", json!("Mei"))]));
}

#[test]
fn decide_mut_writes_defaults_back() {
    let t = parse(
        grid(&[
            &["set/nil:region", "in:topic", "out:team"],
            &["Europe", "sports", "Alice"],
        ]),
        Options::default(),
    )
    .unwrap();
    let mut input = record(&[("topic", json!("sports"))]);
    let r = t.decide_mut(&mut input);
    assert_eq!(r, record(&[("team", json!("Alice"))]));
    assert_eq!(input["region"], json!("Europe"));

    // The borrowing variant leaves the caller's map untouched.
    let input = record(&[("topic", json!("sports"))]);
    let _ = t.decide(&input);
    assert!(!input.contains_key("region"));
}

#[test]
fn decide_is_deterministic() {
    let t = parse(country_grid(64), Options::default()).unwrap();
    let input = record(&[("country", json!("DE")), ("qty", json!(50))]);
    let first = t.decide(&input);
    for _ in 0..5 {
        assert_eq!(t.decide(&input), first);
    }
}

#[test]
fn text_only_table_disables_matchers() {
    let g = grid(&[
        &["string_search"],
        &["in:code", "out:r"],
        &["> 5", "literal"],
    ]);
    let t = parse(g, Options::default()).unwrap();
    // The cell `> 5` is a plain string now.
    assert_eq!(t.decide(&record(&[("code", json!("> 5"))])), record(&[("r", json!("literal"))]));
    assert!(t.decide(&record(&[("code", json!(9))])).is_empty());
}

#[test]
fn compiled_tables_share_across_threads() {
    let t = std::sync::Arc::new(parse(country_grid(100), Options::default()).unwrap());
    let mut handles = Vec::new();
    for i in 0..4 {
        let t = t.clone();
        handles.push(std::thread::spawn(move || {
            let input = record(&[("country", json!("JP")), ("qty", json!(i * 10))]);
            t.decide(&input)
        }));
    }
    for h in handles {
        assert!(!h.join().unwrap().is_empty());
    }
}
