// The State Store key layout of spec.md section 6, as plain functions
// rather than a repeated pile of `format!` calls scattered through
// the Coordination Service.

use cardmesh_base::TxId;

pub fn stock_packs() -> String {
    "stock:packs".to_string()
}

pub fn stock_reservation(tx_id: &TxId) -> String {
    format!("stock:reservations:{tx_id}")
}

pub fn inventory(player_id: &str) -> String {
    format!("inventory:{player_id}")
}

pub fn swap_intent(tx_id: &TxId) -> String {
    format!("inventory:swap_intent:{tx_id}")
}

pub fn tx_record(tx_id: &TxId) -> String {
    format!("tx:{tx_id}")
}

pub fn tx_nonterminal_marker(tx_id: &TxId) -> String {
    format!("tx_index:nonterminal:{tx_id}")
}

pub fn materialized_marker(tx_id: &TxId) -> String {
    format!("tx_index:materialized:{tx_id}")
}
