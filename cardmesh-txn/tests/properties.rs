// Property tests for spec.md section 8's quantified invariants P1, P2
// and P4. P3 and P5 are covered by the scenario-style tests in
// `scenarios.rs`, which exercise atomicity and crash recovery directly
// rather than over randomized inputs.

mod common;

use proptest::prelude::*;

use cardmesh_base::{PeerId, TxIdMinter};
use cardmesh_net::{DecideRequest, RpcHandler};
use cardmesh_store::{
    AbortReason, CardId, Decision, OpenPackPayload, Payload, TradeCardsPayload, TransactionRecord,
    TxKind,
};

use common::give_cards;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// P1: for every sequence of interleaved OPEN_PACK transactions,
    /// `stock_initial = stock_final + (number of commits)`, and the
    /// total cards materialized equals commits × pack_size.
    #[test]
    fn stock_conservation_under_interleaved_open_packs(initial_stock in 0i64..20, num_requests in 0usize..25) {
        let peers = ["norte"];
        let (_store, _transport, engines) = common::build_mesh(&peers, 20);
        engines[0].coordination().bootstrap_stock(initial_stock).unwrap();

        let mut commits = 0i64;
        for i in 0..num_requests {
            let payload = Payload::OpenPack(OpenPackPayload {
                player_id: format!("player-{i}"),
                pack_template_id: "starter".into(),
            });
            match engines[0].begin(payload).unwrap() {
                Decision::Commit => commits += 1,
                Decision::Abort(AbortReason::OutOfStock) => {}
                Decision::Abort(other) => prop_assert!(false, "unexpected abort reason {other:?}"),
            }
        }

        let stock_final = engines[0].coordination().stock_remaining().unwrap();
        prop_assert_eq!(initial_stock, stock_final + commits);

        let total_cards: i64 = (0..num_requests)
            .map(|i| engines[0].coordination().inventory_of(&format!("player-{i}")).unwrap().len() as i64)
            .sum();
        prop_assert_eq!(total_cards, commits * 5);
    }
}

fn tally(a: &[CardId], b: &[CardId]) -> Vec<CardId> {
    let mut all: Vec<CardId> = a.iter().cloned().chain(b.iter().cloned()).collect();
    all.sort();
    all
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// P2: for every TRADE_CARDS attempt (committed or aborted), the
    /// total count of each card id summed across both inventories is
    /// unchanged.
    #[test]
    fn trade_conservation_preserves_card_counts(
        shared in 0usize..4,
        a_only in 0usize..4,
        b_only in 0usize..4,
        out_a in 0usize..6,
        out_b in 0usize..6,
    ) {
        let peers = ["norte", "sul"];
        let (_store, _transport, engines) = common::build_mesh(&peers, 20);
        let coord = engines[0].coordination();
        coord.bootstrap_stock(10).unwrap();
        let minter = TxIdMinter::new(PeerId::from("setup"));

        let mut inv_a: Vec<CardId> = (0..shared).map(|i| CardId::from(format!("shared-{i}").as_str())).collect();
        inv_a.extend((0..a_only).map(|i| CardId::from(format!("a-{i}").as_str())));
        let mut inv_b: Vec<CardId> = (0..shared).map(|i| CardId::from(format!("shared-{i}").as_str())).collect();
        inv_b.extend((0..b_only).map(|i| CardId::from(format!("b-{i}").as_str())));

        give_cards(coord, &minter, "alice", &inv_a);
        give_cards(coord, &minter, "bob", &inv_b);

        let before = tally(&inv_a, &inv_b);

        let cards_a_out: Vec<CardId> = inv_a.iter().take(out_a.min(inv_a.len())).cloned().collect();
        let cards_b_out: Vec<CardId> = inv_b.iter().take(out_b.min(inv_b.len())).cloned().collect();

        let _ = engines[0]
            .begin(Payload::TradeCards(TradeCardsPayload {
                player_a: "alice".into(),
                cards_a_out,
                player_b: "bob".into(),
                cards_b_out,
            }))
            .unwrap();

        let final_a = coord.inventory_of("alice").unwrap();
        let final_b = coord.inventory_of("bob").unwrap();
        let after = tally(&final_a, &final_b);
        prop_assert_eq!(before, after);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// P4: DECIDE is idempotent for any number of duplicate deliveries.
    #[test]
    fn duplicate_decide_delivery_is_idempotent_for_any_repeat_count(repeats in 1usize..10) {
        let peers = ["norte", "sul"];
        let (_store, _transport, engines) = common::build_mesh(&peers, 20);
        engines[0].coordination().bootstrap_stock(5).unwrap();

        let minter = TxIdMinter::new(PeerId::from("norte"));
        let tx_id = minter.mint();
        let record = TransactionRecord::new(
            tx_id.clone(),
            TxKind::OpenPack,
            PeerId::from("norte"),
            vec![PeerId::from("norte"), PeerId::from("sul")],
            Payload::OpenPack(OpenPackPayload {
                player_id: "alice".into(),
                pack_template_id: "starter".into(),
            }),
            0,
        );
        engines[0].coordination().log_tx(&record).unwrap();
        let decision = engines[0].drive(&tx_id).unwrap();
        prop_assert_eq!(decision, Decision::Commit);

        let stock_snapshot = engines[0].coordination().stock_remaining().unwrap();
        let inv_snapshot = engines[0].coordination().inventory_of("alice").unwrap();

        let decide_req = DecideRequest {
            sender: PeerId::from("norte"),
            tx_id: tx_id.clone(),
            sequence: 1,
            decision: Decision::Commit,
            kind: TxKind::OpenPack,
            payload: record.payload.clone(),
            participants: record.participants.clone(),
        };

        for _ in 0..repeats {
            let resp = engines[1].handle_decide(decide_req.clone()).unwrap();
            prop_assert!(resp.ack);
        }

        prop_assert_eq!(engines[0].coordination().stock_remaining().unwrap(), stock_snapshot);
        prop_assert_eq!(engines[0].coordination().inventory_of("alice").unwrap(), inv_snapshot);
    }
}
