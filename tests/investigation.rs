//! End-to-end tests for the Dual-Depth Investigator, driven entirely through
//! `StubEngine` so no UCI subprocess is spawned. Scenarios mirror the
//! maintainer-facing walkthroughs (starting position, forced mate, a crashed
//! branch, a malformed FEN) rather than re-testing the unit-level algorithms
//! already covered inline in `investigator`/`motifs`/`attribution`.

use std::sync::Arc;

use chess_analysis_core::config::{EngineConfig, Policy};
use chess_analysis_core::engine::uci::PvLine;
use chess_analysis_core::engine::{EnginePool, Pools};
use chess_analysis_core::model::{Claim, EvalScore, InvestigationResult};
use chess_analysis_core::{AnalysisError, Investigator, StubEngine, StubResponses};

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn test_engine_config() -> EngineConfig {
    EngineConfig {
        engine_path: "unused-in-tests".to_string(),
        eval_dump_path: None,
        pool_size: 2,
        engine_acquire_timeout_s: 5,
        engine_analysis_timeout_s: 5,
        nnue_dump_timeout_s: 5,
        max_engine_restarts: 2,
    }
}

async fn pools_with(responses: StubResponses, pool_size: usize) -> Pools<StubEngine> {
    let responses = Arc::new(responses);
    let mut config = test_engine_config();
    config.pool_size = pool_size;
    Pools::initialize_with(config, move || {
        let responses = responses.clone();
        async move { StubEngine::spawn(responses).await }
    })
    .await
    .expect("stub pool initializes")
}

/// Policy defaults with an explicit engine pool size, so these tests don't
/// depend on the host's CPU count (relevant for the poisoned-branch test,
/// which deliberately exhausts pool slots on retry).
fn test_policy() -> Policy {
    let mut policy = Policy::default();
    policy.engine.pool_size = 4;
    policy
}

fn line(uci_moves: &[&str], cp: i32) -> PvLine {
    PvLine {
        pv_uci: uci_moves.iter().map(|s| s.to_string()).collect(),
        score: EvalScore::cp(cp),
    }
}

async fn investigate(result_fen: &str, responses: StubResponses, policy: &Policy) -> Result<InvestigationResult, AnalysisError> {
    let pools = pools_with(responses, policy.engine.pool_size).await;
    Investigator::new(&pools, policy).investigate(result_fen).await
}

/// S1 — starting position, policy defaults: d2 overrates `Nf3` over the
/// deep-best `e4`; the deep PV runs into a capture so a coarse motif should
/// surface it.
#[tokio::test]
async fn starting_position_surfaces_one_overrated_move_and_a_capture_motif() {
    let policy = test_policy();

    let responses = StubResponses::new()
        .with_response(
            START_FEN,
            policy.d2_depth,
            vec![line(&["g1f3"], 30), line(&["e2e4"], 25), line(&["d2d4"], 20)],
        )
        .with_response(
            START_FEN,
            policy.d16_depth,
            vec![
                line(&["e2e4", "d7d5", "e4d5"], 35),
                line(&["d2d4"], 20),
                line(&["g1f3"], 15),
            ],
        );

    let result = investigate(START_FEN, responses, &policy).await.expect("investigation succeeds");

    assert_eq!(result.best_move_d16.as_deref(), Some("e4"));
    assert!(!result.is_critical, "35 vs 20 is below the 100cp critical gap");
    assert!(result.overrated_moves.iter().all(|m| m.mv_san != "e4"), "overestimated_moves must exclude best_move_d16");
    assert!(result.overrated_moves.iter().any(|m| m.mv_san == "Nf3"));

    let baseline_count = result.claims.iter().filter(|c| matches!(c, Claim::Baseline { .. })).count();
    let evidence_count = result.claims.iter().filter(|c| matches!(c, Claim::EvidenceLine { .. })).count();
    let overrated_count = result.claims.iter().filter(|c| matches!(c, Claim::OverestimatedMove { .. })).count();
    assert_eq!(baseline_count, 1);
    assert_eq!(evidence_count, 1);
    assert!(overrated_count <= policy.overrated_claim_limit);

    assert_eq!(result.evidence_pgn_line, vec!["e4".to_string(), "d5".to_string(), "exd5".to_string()]);

    assert!(
        result
            .motifs
            .iter()
            .any(|m| m.signature.starts_with("G=coarse |") && m.signature.contains("TYPE:capture")),
        "expected a coarse motif covering the exd5 capture, got {:?}",
        result.motifs.iter().map(|m| &m.signature).collect::<Vec<_>>()
    );
}

/// S2 — forced mate in one (Qxf7#, Scholar's-mate pattern): the root is
/// already winning by mate score and exactly one critical-position claim is
/// emitted.
#[tokio::test]
async fn forced_mate_in_one_is_critical_and_has_a_one_ply_evidence_line() {
    // After 1.e4 e5 2.Bc4 Nc6 3.Qh5 Nf6??, White to move: Qxf7# is forced mate.
    let root_fen = "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4";
    let policy = test_policy();

    let responses = StubResponses::new()
        .with_response(root_fen, policy.d2_depth, vec![line(&["h5f7"], 9999), line(&["c4f7"], 50)])
        .with_response(root_fen, policy.d16_depth, vec![line(&["h5f7"], 9999), line(&["c4f7"], 50)]);

    let result = investigate(root_fen, responses, &policy).await.expect("investigation succeeds");

    assert_eq!(result.best_move_d16.as_deref(), Some("Qxf7#"));
    assert!(result.eval_d16.cp >= 9000);
    assert!(result.is_winning);
    assert!(result.is_critical, "9999 vs 50 clears the 100cp critical gap");

    let critical_claims = result.claims.iter().filter(|c| matches!(c, Claim::CriticalPosition { .. })).count();
    assert_eq!(critical_claims, 1);

    assert_eq!(result.evidence_pgn_line.len(), 1);
    assert_eq!(result.evidence_pgn_line[0], "Qxf7#");
    assert!(result.evidence_eval_start_cp >= 9000);
}

/// S5 — a malformed FEN fails at the root with `invalid_position` and no
/// partial result.
#[tokio::test]
async fn malformed_fen_fails_fast_with_no_partial_result() {
    let policy = test_policy();
    let responses = StubResponses::new();
    let err = investigate("not-a-fen at all", responses, &policy).await.expect_err("malformed FEN must fail");
    assert!(matches!(err, AnalysisError::InvalidPosition(_)));
}

/// S6 — one branch's engine calls are poisoned (simulating a crashed
/// engine): the overall request still succeeds, the poisoned branch carries
/// an error marker, and its healthy sibling completes normally.
#[tokio::test]
async fn a_poisoned_branch_is_marked_with_an_error_while_its_sibling_completes() {
    let policy = test_policy();
    let after_d4 = "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1";

    let responses = StubResponses::new()
        .with_response(
            START_FEN,
            policy.d2_depth,
            vec![line(&["d2d4"], 50), line(&["e2e4"], 40)],
        )
        .with_response(
            START_FEN,
            policy.d16_depth,
            vec![line(&["e2e4"], 30), line(&["d2d4"], 20)],
        )
        .with_poisoned(after_d4);

    let result = investigate(START_FEN, responses, &policy).await.expect("request still succeeds");

    assert!(result.overrated_moves.iter().any(|m| m.mv_san == "d4"));
    assert_eq!(result.best_move_d16.as_deref(), Some("e4"));

    let d4_node = result.tree.iter().find(|n| n.mv_san.as_deref() == Some("d4")).expect("d4 branch was expanded");
    assert!(d4_node.error.is_some(), "poisoned branch must carry an error marker");

    let e4_node = result.tree.iter().find(|n| n.mv_san.as_deref() == Some("e4")).expect("e4 branch was expanded");
    assert!(e4_node.error.is_none(), "healthy sibling must complete normally");

    assert!(result.claims.iter().any(|c| matches!(c, Claim::Baseline { .. })));
    assert!(result.claims.iter().any(|c| matches!(c, Claim::EvidenceLine { .. })));
}

/// Invariant #2 (§8): overestimated moves never include the deep-best move,
/// checked against the tree actually produced rather than just the raw list.
#[tokio::test]
async fn overrated_moves_never_include_the_deep_best_move_anywhere_in_the_tree() {
    let mut policy = test_policy();
    policy.max_tree_depth = 2;
    policy.max_tree_nodes = 20;
    policy.max_branch_lines = 4;
    policy.max_total_lines = 10;

    let responses = StubResponses::new()
        .with_response(
            START_FEN,
            policy.d2_depth,
            vec![line(&["b1c3"], 45), line(&["e2e4"], 40), line(&["d2d4"], 35)],
        )
        .with_response(
            START_FEN,
            policy.d16_depth,
            vec![line(&["e2e4"], 60), line(&["d2d4"], 30), line(&["b1c3"], 10)],
        );

    let result = investigate(START_FEN, responses, &policy).await.expect("investigation succeeds");

    assert!(result.tree.len() <= policy.max_tree_nodes);
    assert!(result.tree.iter().all(|n| n.depth_from_root <= policy.max_tree_depth));
    let best = result.best_move_d16.clone();
    assert!(result.overrated_moves.iter().all(|m| Some(m.mv_san.clone()) != best));
}

/// Invariant #10/#12 (§8): batch analysis de-duplicates repeated FENs and
/// still returns one result per input position, in submission order, even
/// with a single-engine pool.
#[tokio::test]
async fn batch_analysis_deduplicates_and_preserves_order_with_one_engine() {
    let responses = Arc::new(
        StubResponses::new()
            .with_response(START_FEN, 4, vec![line(&["e2e4"], 20)])
            .with_response(&after_e4(), 4, vec![line(&["d7d5"], -5)]),
    );
    let mut config = test_engine_config();
    config.pool_size = 1;
    let pool = EnginePool::initialize_with(config, move || {
        let responses = responses.clone();
        async move { StubEngine::spawn(responses).await }
    })
    .await
    .expect("pool initializes");

    let mut polled = Vec::new();
    let fens = vec![START_FEN.to_string(), after_e4(), START_FEN.to_string()];
    let results = pool
        .analyse_position_batch(fens.clone(), 4, 1, |done, total| polled.push((done, total)))
        .await
        .expect("batch succeeds");

    assert_eq!(results.len(), fens.len());
    assert_eq!(results[0].eval_cp, results[2].eval_cp, "the repeated start position must resolve to the same cached result");
    assert_eq!(results[1].eval_cp, -5);
    assert_eq!(polled.last().copied(), Some((2, 2)), "two unique FENs means two progress callbacks, not three");
}

fn after_e4() -> String {
    "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string()
}
