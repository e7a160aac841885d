//! Perception Pipeline
//!
//! Consumes sampled landmark frames, keeps both decision windows current and
//! decides when the operator has handed over a sub-assembly.
//!
//! Per frame:
//! 1. Frames missing either hand are dropped (throttled log).
//! 2. The first frame with both hands fires the model-ready signal, once.
//! 3. Both windows are updated.
//! 4. While the robot is moving, nothing else happens.
//! 5. Otherwise the segmentation decider runs; a transition classifies the
//!    handover, raises the motion flag and sends the label downstream.

use super::channel::FrameConsumer;
use super::frame::LandmarkFrame;
use super::window::SequenceWindow;
use crate::app::config::Config;
use crate::cell::context::CellContext;
use crate::cell::heartbeat::Throttle;
use crate::decision::{ClassificationEnsemble, SegmentationDecider};
use crate::inference::InferenceBackend;
use crate::{Error, Result};
use crossbeam::channel::Sender;
use std::time::Duration;
use tracing::{debug, error, info};

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub segmentation_window: usize,
    pub classification_window: usize,
    pub timing_window: usize,
    pub timing_threshold: f32,
    pub sample_threshold: f32,
    /// Expected classifier outputs, if known
    pub classes: Option<usize>,
    pub poll_interval: Duration,
    pub hands_wait_log_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segmentation_window: config.decision.segmentation_window,
            classification_window: config.decision.classification_window,
            timing_window: config.decision.timing_window,
            timing_threshold: config.decision.timing_threshold,
            sample_threshold: config.decision.sample_threshold,
            classes: Some(config.dispatch.class_count()),
            poll_interval: Duration::from_millis(config.perception.poll_interval_ms),
            hands_wait_log_interval: Duration::from_millis(
                config.perception.hands_wait_log_interval_ms,
            ),
            heartbeat_interval: Duration::from_millis(config.perception.heartbeat_interval_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames taken from the channel
    pub frames_received: u64,
    /// Frames dropped because a hand was missing
    pub frames_without_hands: u64,
    /// Segmentation steps run
    pub segmentation_steps: u64,
    /// Labels sent downstream
    pub labels_sent: u64,
}

/// Windows, deciders and gating state of the perception unit
pub struct PerceptionPipeline<B: InferenceBackend> {
    backend: B,
    segmentation_window: SequenceWindow,
    classification_window: SequenceWindow,
    decider: SegmentationDecider,
    classifier: ClassificationEnsemble,
    settings: PipelineSettings,
    ready_announced: bool,
    robot_was_moving: bool,
    waiting_log: Throttle,
    stats: PipelineStats,
}

impl<B: InferenceBackend> PerceptionPipeline<B> {
    pub fn new(backend: B, settings: PipelineSettings) -> Self {
        let classifier = match settings.classes {
            Some(classes) => ClassificationEnsemble::with_classes(classes),
            None => ClassificationEnsemble::new(),
        };

        Self {
            backend,
            segmentation_window: SequenceWindow::new(settings.segmentation_window),
            classification_window: SequenceWindow::new(settings.classification_window),
            decider: SegmentationDecider::new(settings.timing_window, settings.timing_threshold)
                .with_sample_threshold(settings.sample_threshold),
            classifier,
            waiting_log: Throttle::new(settings.hands_wait_log_interval),
            settings,
            ready_announced: false,
            robot_was_moving: false,
            stats: PipelineStats::default(),
        }
    }

    /// Run one frame through the pipeline.
    ///
    /// Returns the label sent downstream, if a handover was detected.
    pub fn process_frame(
        &mut self,
        frame: &LandmarkFrame,
        ctx: &CellContext,
        results: &Sender<usize>,
    ) -> Result<Option<usize>> {
        self.stats.frames_received += 1;

        if !frame.has_both_hands() {
            self.stats.frames_without_hands += 1;
            if self.waiting_log.ready() {
                info!("Waiting to detect both hands...");
            }
            return Ok(None);
        }

        if !self.ready_announced {
            info!("First complete frame received, model ready");
            ctx.model_ready.set();
            self.ready_announced = true;
        }

        self.segmentation_window.update(*frame);
        self.classification_window.update(*frame);

        if ctx.motion.is_set() {
            self.robot_was_moving = true;
            return Ok(None);
        }
        if self.robot_was_moving {
            info!("Robot stopped, resuming decisions");
            self.robot_was_moving = false;
        }

        self.stats.segmentation_steps += 1;
        let label = match self.decider.decide(
            &mut self.backend,
            &self.segmentation_window,
            &self.classifier,
            &self.classification_window,
        )? {
            Some(label) => label,
            None => return Ok(None),
        };

        // Raised before sending so the dispatch loop's clear cannot be overtaken
        ctx.motion.set();
        if results.send(label).is_err() {
            if ctx.stop.is_raised() {
                debug!(label, "Robot unit already stopped, label discarded");
                return Ok(None);
            }
            return Err(Error::InconsistentState("result channel closed".to_string()));
        }
        self.stats.labels_sent += 1;
        info!(label, "Trigger sent to robot, decisions paused");
        Ok(Some(label))
    }

    /// Consume frames until the stop signal is raised or the producer hangs up.
    ///
    /// Any error raises the stop signal before it is returned.
    pub fn run(
        &mut self,
        frames: &mut FrameConsumer,
        results: &Sender<usize>,
        ctx: &CellContext,
    ) -> Result<PipelineStats> {
        info!("Perception pipeline started");
        let mut heartbeat = Throttle::new(self.settings.heartbeat_interval);

        let outcome = loop {
            if ctx.stop.is_raised() {
                break Ok(());
            }

            match frames.pop() {
                Some(captured) => {
                    debug!(sequence = captured.sequence, "Frame received");
                    if let Err(e) = self.process_frame(&captured.frame, ctx, results) {
                        break Err(e);
                    }
                }
                None => {
                    if frames.is_abandoned() && frames.is_empty() {
                        info!("Frame source closed");
                        break Ok(());
                    }
                    std::thread::sleep(self.settings.poll_interval);
                }
            }

            if heartbeat.ready() {
                info!(frames = self.stats.frames_received, "Perception running...");
            }
        };

        let drained = frames.pop_batch(usize::MAX).len();
        if drained > 0 {
            debug!(drained, "Discarded queued frames");
        }

        match outcome {
            Ok(()) => {
                info!(
                    frames = self.stats.frames_received,
                    labels = self.stats.labels_sent,
                    "Perception pipeline stopped"
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!("Perception pipeline failed: {}", e);
                ctx.stop.raise();
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.ready_announced
    }

    pub fn segmentation_window(&self) -> &SequenceWindow {
        &self.segmentation_window
    }

    pub fn classification_window(&self) -> &SequenceWindow {
        &self.classification_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::channel::frame_channel;
    use crate::perception::frame::{HandLandmarks, AXES, LANDMARKS_PER_HAND};
    use crossbeam::channel::unbounded;

    /// Static probability equals the first landmark value of the newest
    /// frame; classification always says class 2
    struct FollowsFrame;

    impl InferenceBackend for FollowsFrame {
        fn segment(&mut self, window: &SequenceWindow) -> Result<Vec<f32>> {
            Ok(vec![window.latest().map(|f| f.get(0, 0)).unwrap_or(0.0)])
        }

        fn classify(&mut self, _window: &SequenceWindow) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.1, 0.2, 0.7]])
        }
    }

    struct Failing;

    impl InferenceBackend for Failing {
        fn segment(&mut self, _window: &SequenceWindow) -> Result<Vec<f32>> {
            Err(Error::Inference("backend crashed".to_string()))
        }

        fn classify(&mut self, _window: &SequenceWindow) -> Result<Vec<Vec<f32>>> {
            Err(Error::Inference("backend crashed".to_string()))
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            segmentation_window: 4,
            classification_window: 4,
            timing_window: 4,
            timing_threshold: 0.5,
            sample_threshold: 0.5,
            classes: None,
            poll_interval: Duration::from_millis(1),
            hands_wait_log_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    /// Both hands present; `motion` is the first landmark value
    fn frame(motion: f32) -> LandmarkFrame {
        let hand: HandLandmarks = [[0.5; AXES]; LANDMARKS_PER_HAND];
        let mut frame = LandmarkFrame::from_hands(&hand, &hand);
        frame.set(0, 0, motion);
        frame
    }

    fn one_hand() -> LandmarkFrame {
        let hand: HandLandmarks = [[0.5; AXES]; LANDMARKS_PER_HAND];
        LandmarkFrame::from_hands(&hand, &[[0.0; AXES]; LANDMARKS_PER_HAND])
    }

    #[test]
    fn test_missing_hand_frames_are_dropped() {
        let ctx = CellContext::new();
        let (tx, _rx) = unbounded();
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());

        for _ in 0..3 {
            assert_eq!(pipeline.process_frame(&one_hand(), &ctx, &tx).unwrap(), None);
        }
        assert!(pipeline.segmentation_window().is_empty());
        assert!(!ctx.model_ready.is_set());
        assert_eq!(pipeline.stats().frames_without_hands, 3);
    }

    #[test]
    fn test_first_complete_frame_signals_ready() {
        let ctx = CellContext::new();
        let (tx, _rx) = unbounded();
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());

        pipeline.process_frame(&one_hand(), &ctx, &tx).unwrap();
        pipeline.process_frame(&frame(0.1), &ctx, &tx).unwrap();
        assert!(ctx.model_ready.is_set());
        assert!(pipeline.is_ready());
        assert_eq!(pipeline.segmentation_window().len(), 1);
        assert_eq!(pipeline.classification_window().len(), 1);
    }

    #[test]
    fn test_transition_sends_label_and_sets_motion() {
        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());

        let motions = [0.1, 0.1, 0.9, 0.9];
        let labels: Vec<Option<usize>> = motions
            .iter()
            .map(|&m| pipeline.process_frame(&frame(m), &ctx, &tx).unwrap())
            .collect();

        assert_eq!(labels, vec![None, None, None, Some(2)]);
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
        assert!(ctx.motion.is_set());
    }

    #[test]
    fn test_motion_flag_gates_segmentation() {
        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());

        ctx.motion.set();
        for m in [0.1, 0.1, 0.9, 0.9, 0.9] {
            assert_eq!(pipeline.process_frame(&frame(m), &ctx, &tx).unwrap(), None);
        }
        assert_eq!(pipeline.stats().segmentation_steps, 0);
        assert_eq!(pipeline.segmentation_window().len(), 4);
        assert!(rx.try_recv().is_err());

        ctx.motion.clear();
        pipeline.process_frame(&frame(0.1), &ctx, &tx).unwrap();
        assert_eq!(pipeline.stats().segmentation_steps, 1);
    }

    #[test]
    fn test_closed_result_channel_is_fatal() {
        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        drop(rx);
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());

        let mut outcome = Ok(None);
        for m in [0.1, 0.1, 0.9, 0.9] {
            outcome = pipeline.process_frame(&frame(m), &ctx, &tx);
        }
        assert!(matches!(outcome, Err(Error::InconsistentState(_))));
    }

    #[test]
    fn test_run_stops_when_producer_hangs_up() {
        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        let (mut producer, mut consumer) = frame_channel(16);
        for m in [0.1, 0.1, 0.9, 0.9] {
            assert!(producer.push(frame(m)));
        }
        drop(producer);

        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());
        let stats = pipeline.run(&mut consumer, &tx, &ctx).unwrap();

        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.labels_sent, 1);
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(!ctx.stop.is_raised());
    }

    #[test]
    fn test_run_error_raises_stop() {
        let ctx = CellContext::new();
        let (tx, _rx) = unbounded();
        let (mut producer, mut consumer) = frame_channel(16);
        producer.push(frame(0.1));
        producer.push(frame(0.2));

        let mut pipeline = PerceptionPipeline::new(Failing, settings());
        let result = pipeline.run(&mut consumer, &tx, &ctx);

        assert!(matches!(result, Err(Error::Inference(_))));
        assert!(ctx.stop.is_raised());
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_run_exits_on_stop() {
        let ctx = CellContext::new();
        let (tx, _rx) = unbounded();
        let (mut producer, mut consumer) = frame_channel(16);
        producer.push(frame(0.1));

        ctx.stop.raise();
        let mut pipeline = PerceptionPipeline::new(FollowsFrame, settings());
        let stats = pipeline.run(&mut consumer, &tx, &ctx).unwrap();

        assert_eq!(stats.frames_received, 0);
        assert!(consumer.is_empty());
        drop(producer);
    }
}
