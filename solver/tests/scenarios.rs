//! End-to-end scenarios over the demo problems.

use aps::cache::Cache;
use aps::problem::Problem;
use aps::Solver;

fn demo(name: &str) -> String {
    let path = format!("{}/../demos/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(path).expect("demo problem exists")
}

/// Runs the problem from scratch with a few seeds and returns the first
/// solver that reaches the goal.
fn solve(raw: &str, max_its: usize, seeds: &[u64]) -> Option<Solver> {
    for &seed in seeds {
        let (problem, mut params) = Problem::from_json_str(raw).unwrap();
        params.reset = 1;
        params.max_its = max_its;
        let mut solver = Solver::new(problem, params, seed);
        solver.load(None).unwrap();
        if solver.run() {
            return Some(solver);
        }
    }
    None
}

#[test]
fn trivial_identity_terminates_without_learning() {
    let raw = r#"{
      "objectTypes": [{"name": "token", "properties": []}],
      "slotTypes": [{"name": "pin", "numberOfLayers": 1, "ordered": 0}],
      "handles": [{"name": "move", "initial": "pin", "final": "pin", "modulate": "object"}],
      "task": {
        "objects": [{"name": "x", "type": "token"}],
        "slots": [{"name": "s1", "type": "pin", "holds": ["x"], "score": 1, "bound": []}],
        "initial": [{"name": "s1", "holds": ["x"]}],
        "final": [{"name": "s1", "holds": ["x"]}],
        "constraints": []
      },
      "simulation": {
        "reset": 1, "maxIts": 5,
        "maxMovesInt": 4, "maxMovesIcm": 4, "maxMovesScm": 4,
        "maxRecsLct": 5, "maxRecsInt": 5, "maxRecsIcm": 5,
        "maxTruncsInt": 3, "maxTruncsIcm": 3,
        "probRedoLct": 0.5, "probRedoInt": 0.5, "probRedoIcm": 0.5,
        "sizePattern": 2, "precision": 2
      }
    }"#;
    let (problem, params) = Problem::from_json_str(raw).unwrap();
    let mut solver = Solver::new(problem, params, 42);
    solver.load(None).unwrap();
    // the state never regresses and the run succeeds on the first pass
    assert!(solver.run());
    assert_eq!(solver.main.config(), solver.main.goal);
    assert!(solver.cache.lcts.is_empty());
    assert!(solver.cache.ints.is_empty());
    assert!(solver.cache.icms.is_empty());
    assert!(solver.cache.scms.is_empty());
    assert!(solver.cache.cnds.is_empty());
}

#[test]
fn tower_of_hanoi_reaches_the_goal_and_learns() {
    let raw = demo("hanoi.json");
    let s = solve(&raw, 20000, &[2024, 7, 99]).expect("no seed solved the tower");
    // the goal weighs the same and every pin matches it exactly; only the
    // hand's final resting position is free
    assert_eq!(s.main.goal.distance(&s.main.config(), &s.problem), 0.0);
    assert!(s.main.config().eq_pins(&s.main.goal, &s.problem));

    // a goal-level strategy was persisted, including the optimized variant
    // that wraps the whole solution into a single relocation
    assert!(!s.cache.scms.is_empty());
    assert!(s.cache.scms.iter().any(|sc| sc.mv.moves.len() == 1));

    // referential closure: every child reference resolves in its collection
    for sc in &s.cache.scms {
        assert!(sc.mv.conf_in.idx() < s.cache.cfgs.len());
        assert!(sc.mv.conf_out.idx() < s.cache.cfgs.len());
        for &w in &sc.mv.moves {
            assert!(w.idx() < s.cache.icms.len());
        }
    }
    for w in &s.cache.icms {
        assert!(w.mv.tensoral.idx() < s.cache.tris.len());
        for &i in &w.mv.conceptual {
            assert!(i.idx() < s.cache.ints.len());
        }
    }
    for i in &s.cache.ints {
        for &l in &i.mv.moves {
            assert!(l.idx() < s.cache.lcts.len());
        }
    }

    // every persisted path strategy spans its recorded endpoints
    for i in &s.cache.ints {
        assert!(!i.mv.moves.is_empty());
        let first = s.cache.lct(i.mv.moves[0]).mv;
        let last = s.cache.lct(*i.mv.moves.last().unwrap()).mv;
        assert_eq!(first.slot_in, i.mv.slot_in);
        assert_eq!(last.slot_out, i.mv.slot_out);
        assert_eq!(i.score as usize, i.mv.moves.len());
    }
}

#[test]
fn hanoi_cache_round_trip_and_dedup() {
    let raw = demo("hanoi.json");
    let mut s = solve(&raw, 20000, &[2024, 7, 99]).expect("no seed solved the tower");
    let dir = tempfile::tempdir().unwrap();
    let problem = s.problem.clone();
    s.cache.write(dir.path(), &problem).unwrap();

    // a fresh cache re-interns every strategy with identical names and
    // equal structure
    let (p2, _) = Problem::from_json_str(&raw).unwrap();
    let mut back = Cache::default();
    back.read(dir.path(), &p2).unwrap();
    assert_eq!(back.cfgs.len(), s.cache.cfgs.len());
    assert_eq!(back.tris.len(), s.cache.tris.len());
    assert_eq!(back.lcts.len(), s.cache.lcts.len());
    assert_eq!(back.ints.len(), s.cache.ints.len());
    assert_eq!(back.icms.len(), s.cache.icms.len());
    assert_eq!(back.scms.len(), s.cache.scms.len());
    assert_eq!(back.cnds.len(), s.cache.cnds.len());
    for (a, b) in back.lcts.iter().zip(&s.cache.lcts) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.mv, b.mv);
    }
    for (a, b) in back.ints.iter().zip(&s.cache.ints) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.mv, b.mv);
        assert_eq!(a.score, b.score);
    }
    for (a, b) in back.scms.iter().zip(&s.cache.scms) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.mv, b.mv);
    }

    // re-interning any loaded entry leaves every collection size unchanged
    let n_lct = back.lcts.len();
    let n_int = back.ints.len();
    let n_icm = back.icms.len();
    let n_scm = back.scms.len();
    for i in 0..n_lct {
        let mv = back.lcts[i].mv;
        back.intern_lct(mv);
    }
    for i in 0..n_int {
        let mv = back.ints[i].mv.clone();
        back.intern_int(mv);
    }
    for i in 0..n_icm {
        let mv = back.icms[i].mv.clone();
        back.intern_icm(mv);
    }
    for i in 0..n_scm {
        let mv = back.scms[i].mv.clone();
        back.intern_scm(mv);
    }
    assert_eq!(back.lcts.len(), n_lct);
    assert_eq!(back.ints.len(), n_int);
    assert_eq!(back.icms.len(), n_icm);
    assert_eq!(back.scms.len(), n_scm);

    // a second run against the persisted cache still reaches the goal
    let (p3, mut params) = Problem::from_json_str(&raw).unwrap();
    params.reset = 0;
    params.max_its = 20000;
    let mut second = Solver::new(p3, params, 4711);
    second.load(Some(dir.path())).unwrap();
    assert_eq!(second.cache.scms.len(), s.cache.scms.len());
    assert!(second.run(), "the warmed-up run did not reach the goal");
}

#[test]
fn river_crossing_reaches_the_goal() {
    let raw = demo("ferry.json");
    let s = solve(&raw, 20000, &[11, 2024, 31337]).expect("no seed ferried everyone across");
    assert_eq!(s.main.goal.distance(&s.main.config(), &s.problem), 0.0);
    assert!(s.main.config().eq_pins(&s.main.goal, &s.problem));
    assert!(!s.cache.scms.is_empty());
}

#[test]
fn optimizer_compresses_a_known_solution() {
    // feed the canonical seven-relocation tower solution through the
    // optimizer and check the resulting primitive path stays tight
    let raw = demo("hanoi.json");
    let (problem, _) = Problem::from_json_str(&raw).unwrap();
    let mut cache = Cache::default();
    let lct = |cache: &mut Cache, h: &str, si: &str, m: &str, so: &str| {
        cache.intern_lct(aps::strategy::LctMove {
            handle: problem.handle_id(h).unwrap(),
            slot_in: problem.slot_id(si).unwrap(),
            movable: problem.movable_id(m).unwrap(),
            slot_out: problem.slot_id(so).unwrap(),
        })
    };
    // one relocation = shift into place, take, shift, put
    let relocation = |cache: &mut Cache, disk: &str, from: &str, to: &str, hand_at: &str| {
        let (qf, qt) = (
            format!("q{}", &from[1..]),
            format!("q{}", &to[1..]),
        );
        let mut moves = Vec::new();
        if hand_at != qf {
            moves.push(lct(cache, "shift", hand_at, "hand", &qf));
        }
        moves.push(lct(cache, "take", from, disk, "hand"));
        moves.push(lct(cache, "shift", &qf, "hand", &qt));
        moves.push(lct(cache, "put", "hand", disk, to));
        let slot_in = problem.slot_id(from).unwrap();
        let slot_out = problem.slot_id(to).unwrap();
        cache.intern_int(aps::strategy::IntMove { slot_in, moves, slot_out })
    };
    // d1 a->c, d2 a->b, d1 c->b, d3 a->c, d1 b->a, d2 b->c, d1 a->c
    let path = vec![
        relocation(&mut cache, "d1", "pa", "pc", "qa"),
        relocation(&mut cache, "d2", "pa", "pb", "qc"),
        relocation(&mut cache, "d1", "pc", "pb", "qb"),
        relocation(&mut cache, "d3", "pa", "pc", "qb"),
        relocation(&mut cache, "d1", "pb", "pa", "qc"),
        relocation(&mut cache, "d2", "pb", "pc", "qa"),
        relocation(&mut cache, "d1", "pa", "pc", "qc"),
    ];
    let reduced = aps::paths::reduce_int_path(&mut cache, &problem, path, 4);
    let primitive_count: usize = reduced
        .iter()
        .map(|&i| cache.int(i).mv.moves.len())
        .sum();
    assert!(primitive_count <= 27, "optimized path has {primitive_count} moves");
    // the reducer output is a fixpoint
    let again = aps::paths::reduce_int_path(&mut cache, &problem, reduced.clone(), 4);
    assert_eq!(again, reduced);
}
