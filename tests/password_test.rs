mod common;

use auth_core::utils::Password;
use common::seeded_state;

#[tokio::test]
async fn state_hasher_round_trips_credentials() {
    let (state, _sink) = seeded_state();

    let password = Password::new("correct horse battery staple");
    let hash = state.hasher.hash(&password).unwrap();

    assert!(hash.starts_with("$argon2id$"));
    assert!(state.hasher.verify(&password, &hash).unwrap());
    assert!(!state
        .hasher
        .verify(&Password::new("tr0ub4dor&3"), &hash)
        .unwrap());
}
