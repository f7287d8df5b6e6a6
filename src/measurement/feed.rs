use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Tab showing the I-V curve of the present condition
pub const TAB_IV:usize = 0;
/// Tab showing R against the swept condition
pub const TAB_RESISTANCE:usize = 1;
/// Tab showing Ic and Ir against the swept condition
pub const TAB_CRITICAL:usize = 2;
/// Tab fed by the thermometer logger
pub const TAB_TEMPERATURE:usize = 3;
/// Tab showing V against field at a fixed bias, series 0 going up and 1 going down
pub const TAB_FIELD_SCAN:usize = 4;

/// What the measurement thread tells whoever draws the plots.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotEvent {
	AppendPoints { tab: usize, series: usize, points: Vec<(f64, f64)> },
	Redraw { tab: usize },
	Title { tab: usize, text: String },
}

/// Producer half of the plot queue.
///
/// Sending never blocks: when the consumer falls behind and the queue is
/// full the event is dropped and counted.
#[derive(Debug, Clone)]
pub struct PlotFeed {
	tx: Option<Sender<PlotEvent>>,
	dropped: Arc<AtomicUsize>,
}

impl PlotFeed {

	pub fn bounded(capacity:usize) -> (Self, Receiver<PlotEvent>) {
		let (tx, rx) = bounded(capacity);
		(Self{ tx: Some(tx), dropped: Arc::new(AtomicUsize::new(0)) }, rx)
	}

	/// A feed nobody listens to.
	pub fn disconnected() -> Self {
		Self{ tx: None, dropped: Arc::new(AtomicUsize::new(0)) }
	}

	pub fn dropped(&self) -> usize { self.dropped.load(Ordering::Relaxed) }

	pub fn send(&self, event:PlotEvent) -> bool {
		let tx = match &self.tx {
			Some(tx) => tx,
			None => return false,
		};
		match tx.try_send(event) {
			Ok(()) => true,
			Err(TrySendError::Full(_)) => {
				self.dropped.fetch_add(1, Ordering::Relaxed);
				false
			},
			Err(TrySendError::Disconnected(_)) => false,
		}
	}

	pub fn append(&self, tab:usize, series:usize, points:Vec<(f64, f64)>) -> bool {
		self.send(PlotEvent::AppendPoints{ tab, series, points })
	}

	pub fn redraw(&self, tab:usize) -> bool { self.send(PlotEvent::Redraw{ tab }) }

	pub fn title(&self, tab:usize, text:impl Into<String>) -> bool {
		self.send(PlotEvent::Title{ tab, text: text.into() })
	}

}

impl Default for PlotFeed {
	fn default() -> Self { Self::disconnected() }
}
