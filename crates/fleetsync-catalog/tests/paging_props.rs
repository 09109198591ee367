//! Property tests for paginated listing.

use chrono::Utc;
use futures::TryStreamExt;
use proptest::prelude::*;

use fleetsync_catalog::model::WardenInfo;
use fleetsync_catalog::{Database, InMemoryDatabase, Query, stream_all};

fn warden_info(network_id: &str, business_key: &str) -> WardenInfo {
    WardenInfo {
        network_id: network_id.into(),
        process_deployment_id: "d1".into(),
        business_key: business_key.into(),
        creation_time: Utc::now(),
        start_parameters: Default::default(),
    }
}

fn seeded(n1: usize, n2: usize) -> InMemoryDatabase {
    let db = InMemoryDatabase::new();
    tokio_test::block_on(async {
        for i in 0..n1 {
            db.save(&warden_info("n1", &format!("bk{i:03}"))).await.unwrap();
        }
        for i in 0..n2 {
            db.save(&warden_info("n2", &format!("bk{i:03}"))).await.unwrap();
        }
    });
    db
}

proptest! {
    #[test]
    fn stream_yields_every_match_once(n1 in 0usize..40, n2 in 0usize..10, page_size in 1usize..12) {
        let db = seeded(n1, n2);

        let streamed: Vec<WardenInfo> = tokio_test::block_on(
            stream_all(&db, Query::network("n1"), page_size).try_collect(),
        )
        .unwrap();
        let listed: Vec<WardenInfo> =
            tokio_test::block_on(db.list_all(&Query::network("n1"))).unwrap();

        prop_assert_eq!(streamed.len(), n1);
        prop_assert_eq!(streamed, listed);
    }

    #[test]
    fn pages_chain_through_next_offset(n1 in 0usize..40, page_size in 1usize..12) {
        let db = seeded(n1, 0);

        let mut offset = 0;
        let mut seen = 0;
        let mut pages = 0;
        loop {
            let page = tokio_test::block_on(
                db.list::<WardenInfo>(&Query::all().page(offset, page_size)),
            )
            .unwrap();
            prop_assert!(page.items.len() <= page_size);
            seen += page.items.len();
            pages += 1;
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        prop_assert_eq!(seen, n1);
        prop_assert!(pages <= n1 / page_size + 1);
    }
}
