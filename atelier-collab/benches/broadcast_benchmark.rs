use atelier_collab::broadcast::{BroadcastGroup, RoomEvent};
use atelier_collab::hub::{CollabHub, HubConfig};
use atelier_collab::identity::StaticTokenVerifier;
use atelier_collab::protocol::{ClientMessage, ServerMessage};
use atelier_collab::session::Role;
use atelier_collab::store::MemoryThemeStore;
use atelier_core::{Block, BlockKind, BlockOperation, ThemeEditingState, Zone};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn preview(session_id: Uuid) -> ServerMessage {
    ServerMessage::PreviewChange {
        path: "colors.primary".into(),
        value: json!("#336699"),
        temporary: true,
        acting_subject_id: "alice".into(),
        session_id,
    }
}

fn bench_client_decode(c: &mut Criterion) {
    let text = ClientMessage::BlockUpdate(BlockOperation::update("hero-1", json!({"title": "Hi"})))
        .encode()
        .unwrap();

    c.bench_function("client_decode_block_update", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(&text)).unwrap());
        })
    });
}

fn bench_event_encode(c: &mut Criterion) {
    let session_id = Uuid::new_v4();

    c.bench_function("room_event_encode_preview", |b| {
        b.iter(|| {
            black_box(RoomEvent::to_others(session_id, preview(session_id)).unwrap());
        })
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let group = BroadcastGroup::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
    let sender = Uuid::new_v4();

    c.bench_function("broadcast_100_members", |b| {
        b.iter(|| {
            let event = RoomEvent::to_others(sender, preview(sender)).unwrap();
            group.send(black_box(event));
            for rx in receivers.iter_mut() {
                let event = rx.try_recv().unwrap();
                black_box(event.visible_to(sender));
            }
        })
    });
}

fn bench_hub_block_update(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = MemoryThemeStore::new();
    let blocks = (0..50)
        .map(|i| Block::new(format!("b{i}"), BlockKind::Text, Zone::Content).with_order(i))
        .collect();
    store.insert(ThemeEditingState::with_blocks("bench", blocks)).unwrap();
    let verifier = StaticTokenVerifier::new().with_token("tok", "alice", Role::Editor);
    let hub = CollabHub::new(HubConfig::default(), Arc::new(verifier), Arc::new(store));

    let session_id = runtime.block_on(async {
        let session = hub.authenticate("tok").await.unwrap();
        hub.join(session.session_id, "bench", None).await.unwrap();
        session.session_id
    });

    c.bench_function("hub_block_update_50_blocks", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let op = BlockOperation::update("b25", json!({"title": "Hi"}));
                black_box(hub.apply_block_operation(session_id, op).await.unwrap());
            })
        })
    });
}

criterion_group!(
    benches,
    bench_client_decode,
    bench_event_encode,
    bench_fan_out,
    bench_hub_block_update,
);
criterion_main!(benches);
