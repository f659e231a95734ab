//! # Presentation モジュール
//!
//! 確定済みのグローバル状態テーブルを表示側へ渡すための読み取り専用の窓口です。
//!
//! シミュレーション側は `watch` チャネルへ最新フレームを置くだけで、
//! 表示側の処理速度に関係なく待たされることはありません。表示側は
//! 好きな間隔でフレームを取り出し、途中のティックを読み飛ばしても構いません。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::models::record::{AgentRole, GlobalStateTable};

/// 1ティック分の確定フレーム
pub type Frame = Arc<GlobalStateTable>;

/// フレーム配信用チャネルを作成
pub fn frame_channel() -> (FramePublisher, PresentationFeed) {
    let (tx, rx) = watch::channel(None);
    (FramePublisher { tx }, PresentationFeed { rx })
}

/// シミュレーション側の送信口
#[derive(Debug)]
pub struct FramePublisher {
    tx: watch::Sender<Option<Frame>>,
}

impl FramePublisher {
    /// 最新フレームを置き換える（受信側がいなくても失敗しない）
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }
}

/// 表示側の受信口
#[derive(Debug, Clone)]
pub struct PresentationFeed {
    rx: watch::Receiver<Option<Frame>>,
}

impl PresentationFeed {
    /// 現在の最新フレーム
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }

    /// 次のフレームが届くまで待つ（シミュレーション終了でNone）
    pub async fn wait_for_next(&mut self) -> Option<Frame> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

/// テキスト形式の描画器
///
/// UAVごとに `index,phase,x,y,z` の1行を出力します。
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    every: u64,
}

impl TextRenderer {
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1) }
    }

    pub fn should_render(&self, tick: u64) -> bool {
        tick % self.every == 0
    }

    /// フレームを行の列に変換（観測者スロットは描画しない）
    pub fn render(frame: &GlobalStateTable) -> Vec<String> {
        frame
            .iter()
            .filter(|(_, record)| record.role == AgentRole::Uav)
            .map(|(index, record)| record.to_frame_line(index))
            .collect()
    }

    /// 配信が終わるまでフレームを標準出力へ描画し、描画したフレーム数を返す
    pub async fn run(self, mut feed: PresentationFeed) -> u64 {
        let mut rendered = 0;
        while let Some(frame) = feed.wait_for_next().await {
            if !self.should_render(frame.tick()) {
                continue;
            }
            println!("# tick {} ({} on surface)", frame.tick(), frame.count_on_surface());
            for line in Self::render(&frame) {
                println!("{}", line);
            }
            rendered += 1;
        }
        debug!(rendered, "描画を終了しました");
        rendered
    }
}
