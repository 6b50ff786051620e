use proptest::prelude::*;

use ylog::{Config, Ylog};
use yrs::{
    Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact,
    updates::encoder::Encode,
};

const DOCS: usize = 3;

#[derive(Debug, Clone)]
enum Action {
    Edit { doc: usize, chunk: String, pos_seed: u16 },
    Materialize { doc: usize },
    StateVector { doc: usize },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (0..DOCS, "[a-z]{1,6}", any::<u16>())
            .prop_map(|(doc, chunk, pos_seed)| Action::Edit { doc, chunk, pos_seed }),
        1 => (0..DOCS).prop_map(|doc| Action::Materialize { doc }),
        1 => (0..DOCS).prop_map(|doc| Action::StateVector { doc }),
    ]
}

struct Session {
    doc: Doc,
    text: TextRef,
    last_sv: StateVector,
    edits: usize,
}

impl Session {
    fn new() -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("body");
        Self {
            doc,
            text,
            last_sv: StateVector::default(),
            edits: 0,
        }
    }

    fn edit(&mut self, pos_seed: u16, chunk: &str) -> Vec<u8> {
        let len = self.string().len() as u32;
        let pos = u32::from(pos_seed) % (len + 1);
        {
            let mut txn = self.doc.transact_mut();
            self.text.insert(&mut txn, pos, chunk);
        }
        self.edits += 1;
        let txn = self.doc.transact();
        let update = txn.encode_state_as_update_v1(&self.last_sv);
        self.last_sv = txn.state_vector();
        update
    }

    fn string(&self) -> String {
        self.text.get_string(&self.doc.transact())
    }

    fn sv_bytes(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }
}

proptest! {
    /// Random edit scripts with interleaved materializations (and the
    /// compactions they trigger at a tiny threshold) always reconstruct
    /// exactly the reference document.
    #[test]
    fn replay_and_compaction_converge_to_reference(
        actions in prop::collection::vec(action_strategy(), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        rt.block_on(async move {
            let cfg = Config {
                flush_threshold: 4,
                ..Config::default()
            };
            let persistence = Ylog::open_in_memory(cfg).expect("open");
            let mut sessions: Vec<Session> = (0..DOCS).map(|_| Session::new()).collect();

            for action in actions {
                match action {
                    Action::Edit { doc, chunk, pos_seed } => {
                        let update = sessions[doc].edit(pos_seed, &chunk);
                        persistence
                            .store_update(&format!("doc-{doc}"), &update)
                            .await
                            .expect("store");
                    }
                    Action::Materialize { doc } => {
                        let loaded = persistence
                            .get_doc(&format!("doc-{doc}"))
                            .await
                            .expect("get");
                        let text = loaded.get_or_insert_text("body");
                        assert_eq!(
                            text.get_string(&loaded.transact()),
                            sessions[doc].string()
                        );
                    }
                    Action::StateVector { doc } => {
                        let sv = persistence
                            .state_vector(&format!("doc-{doc}"))
                            .await
                            .expect("sv");
                        if sessions[doc].edits == 0 {
                            assert_eq!(sv, None);
                        } else {
                            assert_eq!(sv, Some(sessions[doc].sv_bytes()));
                        }
                    }
                }
            }

            // Final convergence for every document.
            for (i, session) in sessions.iter().enumerate() {
                let loaded = persistence
                    .get_doc(&format!("doc-{i}"))
                    .await
                    .expect("get");
                let text = loaded.get_or_insert_text("body");
                assert_eq!(text.get_string(&loaded.transact()), session.string());
                if session.edits > 0 {
                    assert_eq!(
                        persistence
                            .state_vector(&format!("doc-{i}"))
                            .await
                            .expect("sv"),
                        Some(session.sv_bytes())
                    );
                }
            }

            persistence.shutdown().await.expect("shutdown");
        });
    }
}
