//! 活文档更新集成测试
//!
//! 覆盖事件循环：变更防抖、自触发过滤、迟到结果丢弃
//! 和隐藏图片覆盖层的周期清理。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::LocalSet;

use lingodom::config::constants;
use lingodom::dom::{
    append_child, find_elements, get_node_attr, new_element, new_text, serialize_to_html,
    set_node_attr,
};
use lingodom::{ControlCommand, Mutation, MutationBatch, TranslationEngine};

mod common {
    include!("common/mod.rs");
}

use common::{build_engine, paragraph_texts, MockProvider};

fn enable(target: &str) -> ControlCommand {
    ControlCommand::Enable {
        target_language: target.to_string(),
        always_translate_images: false,
    }
}

/// 让当前就绪的任务都跑完
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn spawn_engine(
    engine: &TranslationEngine,
) -> (
    mpsc::Sender<ControlCommand>,
    mpsc::Sender<MutationBatch>,
    tokio::task::JoinHandle<()>,
) {
    let (control_tx, control_rx) = mpsc::channel(8);
    let (mutation_tx, mutation_rx) = mpsc::channel(8);
    let engine = engine.clone();
    let handle = tokio::task::spawn_local(async move {
        engine.run(control_rx, mutation_rx).await;
    });
    (control_tx, mutation_tx, handle)
}

#[tokio::test(start_paused = true)]
async fn test_mutation_debounce_triggers_supplemental_pass() {
    LocalSet::new()
        .run_until(async {
            let provider = MockProvider::new();
            let (dom, engine) = build_engine(
                "<html lang=\"en\"><body><p>Initial content here</p></body></html>",
                provider.clone(),
            );
            let (control_tx, mutation_tx, handle) = spawn_engine(&engine);

            control_tx.send(enable("fr")).await.unwrap();
            settle().await;
            assert_eq!(paragraph_texts(&dom)[0], "[fr] Initial content here");

            // 页面后续新增一段内容
            let body = find_elements(&dom.document, "body").remove(0);
            let fresh = new_element(&dom, "p", &[]);
            append_child(&fresh, &new_text("Freshly added content"));
            append_child(&body, &fresh);
            mutation_tx
                .send(MutationBatch::single(Mutation::AddedNode(fresh)))
                .await
                .unwrap();
            settle().await;

            // 静默期未到，不翻译
            tokio::time::advance(Duration::from_millis(1500)).await;
            settle().await;
            assert_eq!(paragraph_texts(&dom)[1], "Freshly added content");

            // 静默期结束，补充翻译只处理新增内容（旧内容命中缓存）
            let calls_before = provider.call_count();
            tokio::time::advance(Duration::from_millis(600)).await;
            settle().await;
            assert_eq!(paragraph_texts(&dom)[1], "[fr] Freshly added content");
            assert_eq!(provider.call_count(), calls_before + 1);

            drop(control_tx);
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_mutations_slide_the_debounce() {
    LocalSet::new()
        .run_until(async {
            let provider = MockProvider::new();
            let (dom, engine) = build_engine(
                "<html lang=\"en\"><body><p>Base paragraph text</p></body></html>",
                provider.clone(),
            );
            let (control_tx, mutation_tx, handle) = spawn_engine(&engine);

            control_tx.send(enable("fr")).await.unwrap();
            settle().await;

            let body = find_elements(&dom.document, "body").remove(0);
            for i in 0..3 {
                let fresh = new_element(&dom, "p", &[]);
                append_child(&fresh, &new_text(&format!("Streamed chunk {i}")));
                append_child(&body, &fresh);
                mutation_tx
                    .send(MutationBatch::single(Mutation::AddedNode(fresh)))
                    .await
                    .unwrap();
                settle().await;
                tokio::time::advance(Duration::from_millis(1000)).await;
                settle().await;
            }

            // 每次变更都顺延了静默期：此刻距最后一次变更只有 1s
            assert!(paragraph_texts(&dom)
                .iter()
                .skip(1)
                .all(|t| t.starts_with("Streamed")));

            tokio::time::advance(Duration::from_millis(1100)).await;
            settle().await;
            assert!(paragraph_texts(&dom)
                .iter()
                .all(|t| t.starts_with("[fr]")));

            drop(control_tx);
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_self_inflicted_mutations_do_not_retrigger() {
    LocalSet::new()
        .run_until(async {
            let provider = MockProvider::new();
            let (dom, engine) = build_engine(
                "<html lang=\"en\"><body><p>Visible paragraph</p></body></html>",
                provider.clone(),
            );
            let (control_tx, mutation_tx, handle) = spawn_engine(&engine);

            control_tx.send(enable("fr")).await.unwrap();
            settle().await;
            let calls_before = provider.call_count();

            // 引擎自己注入的覆盖层结构不应触发新一轮
            let overlay = new_element(&dom, "div", &[("class", constants::OVERLAY_CLASS)]);
            mutation_tx
                .send(MutationBatch::single(Mutation::AddedNode(overlay)))
                .await
                .unwrap();
            settle().await;
            tokio::time::advance(Duration::from_secs(5)).await;
            settle().await;

            assert_eq!(provider.call_count(), calls_before);

            drop(control_tx);
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_results_dropped_after_disable() {
    LocalSet::new()
        .run_until(async {
            let provider = MockProvider::new();
            provider.with_latency(Duration::from_millis(500));
            let (dom, engine) = build_engine(
                "<html lang=\"en\"><body><p>Slow to translate</p></body></html>",
                provider.clone(),
            );
            let before = serialize_to_html(&dom.document);

            let pass = {
                let engine = engine.clone();
                tokio::task::spawn_local(async move {
                    engine.handle_command(enable("fr")).await;
                })
            };
            // 轮次已启动并等待服务方返回
            tokio::task::yield_now().await;

            engine.handle_command(ControlCommand::Disable).await;
            pass.await.unwrap();

            // 迟到的结果被丢弃，文档保持原文
            assert_eq!(serialize_to_html(&dom.document), before);
            assert_eq!(engine.stats().texts_applied, 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_hidden_image_overlay_swept_on_maintenance() {
    LocalSet::new()
        .run_until(async {
            let provider = MockProvider::new();
            let (dom, engine) = build_engine(
                "<html lang=\"en\"><body>\
                 <img src=\"https://example.com/a.png\" width=\"200\" height=\"100\">\
                 </body></html>",
                provider.clone(),
            );
            let (control_tx, _mutation_tx, handle) = spawn_engine(&engine);

            control_tx.send(enable("fr")).await.unwrap();
            settle().await;

            let img = find_elements(&dom.document, "img").remove(0);
            assert!(get_node_attr(&img, constants::MARKER_IMAGE_TRANSLATED).is_some());

            // 页面把图片藏了起来
            set_node_attr(&img, "style", Some("display: none".to_string()));

            tokio::time::advance(Duration::from_millis(constants::MAINTENANCE_TICK_MS + 100))
                .await;
            settle().await;

            assert!(get_node_attr(&img, constants::MARKER_IMAGE_TRANSLATED).is_none());
            assert!(find_elements(&dom.document, "div").is_empty());

            drop(control_tx);
            handle.await.unwrap();
        })
        .await;
}
