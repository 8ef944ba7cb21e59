use crate::{
    AcquisitionRequest, BoardModel, CancelToken, Digitizer, DmaDevice, Outcome, TransferStats,
};
use anyhow::{anyhow, Result};
use crossbeam_channel::{tick, unbounded, Receiver, Sender, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Stylize},
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Gauge, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Messages from the acquisition thread to the display.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress {
        run: usize,
        fraction: f64,
        bytes: usize,
        records: usize,
    },
    Finished {
        run: usize,
        summary: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusExit {
    Quit,
    Done,
}

pub type RunResults<D> = (Digitizer<D>, Vec<crate::Result<Outcome>>);

#[derive(Debug)]
pub struct Status {
    pub counter: TransferStats,
    pub t_begin: Instant,
    pub model: BoardModel,
    pub repeat: usize,
    pub curr_run: usize,
    pub fraction: f64,
    pub last_summary: String,
    pub cancel: CancelToken,
    pub exit: Option<StatusExit>,
}

impl Status {
    pub fn new(model: BoardModel, repeat: usize, cancel: CancelToken) -> Self {
        Self {
            counter: TransferStats::default(),
            t_begin: Instant::now(),
            model,
            repeat,
            curr_run: 0,
            fraction: 0.0,
            last_summary: String::new(),
            cancel,
            exit: None,
        }
    }

    /// Run `repeat` acquisitions on a worker thread and show their progress
    /// until they are all done or the user quits. Hands the digitizer back
    /// along with every acquisition's result.
    pub fn run<D>(
        &mut self,
        terminal: &mut DefaultTerminal,
        digitizer: Digitizer<D>,
        request: AcquisitionRequest,
        external_trigger: bool,
    ) -> Result<RunResults<D>>
    where
        D: DmaDevice + Send + 'static,
    {
        let ticker = tick(Duration::from_millis(100));
        let (tx_events, rx_events) = unbounded();
        let handle = self.begin_runs(digitizer, request, external_trigger, tx_events);

        while self.exit != Some(StatusExit::Done) {
            let _ = ticker.recv();

            if self.drain(&rx_events) {
                self.exit = Some(StatusExit::Done);
            }

            self.handle_events()?;

            terminal.draw(|f| self.draw(f))?;
        }

        handle
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))
    }

    fn begin_runs<D>(
        &self,
        mut digitizer: Digitizer<D>,
        request: AcquisitionRequest,
        external_trigger: bool,
        tx_events: Sender<RunEvent>,
    ) -> JoinHandle<RunResults<D>>
    where
        D: DmaDevice + Send + 'static,
    {
        let repeat = self.repeat;
        let cancel = self.cancel.clone();
        thread::spawn(move || {
            let mut results = Vec::with_capacity(repeat);
            for run in 0..repeat {
                if cancel.is_cancelled() {
                    break;
                }
                let (bytes, records) = digitizer
                    .plan(&request)
                    .map(|p| (p.bytes_per_buffer(), p.records_per_buffer))
                    .unwrap_or((0, 0));
                let result = digitizer.acquire(&request, external_trigger, &cancel, |fraction| {
                    let _ = tx_events.send(RunEvent::Progress {
                        run,
                        fraction,
                        bytes,
                        records,
                    });
                });
                let summary = match &result {
                    Ok(Outcome::Completed(_)) => "completed".to_string(),
                    Ok(Outcome::Cancelled {
                        buffers_completed, ..
                    }) => format!("cancelled after {} buffers", buffers_completed),
                    Err(e) => format!("failed: {}", e),
                };
                let failed = result.is_err();
                results.push(result);
                if tx_events.send(RunEvent::Finished { run, summary }).is_err() || failed {
                    break;
                }
            }
            (digitizer, results)
        })
    }

    /// Apply everything queued so far. Returns true once the worker is gone.
    fn drain(&mut self, rx: &Receiver<RunEvent>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(ev) => self.apply(ev),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn apply(&mut self, ev: RunEvent) {
        match ev {
            RunEvent::Progress {
                run,
                fraction,
                bytes,
                records,
            } => {
                if run + 1 != self.curr_run {
                    self.curr_run = run + 1;
                    self.counter.restart();
                }
                self.fraction = fraction;
                self.counter.record_buffer(bytes, records);
            }
            RunEvent::Finished { run, summary } => {
                self.last_summary = format!("Run {}: {}", run + 1, summary);
            }
        }
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                _ => {}
            };
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        if let KeyCode::Char('q') = key_event.code {
            self.exit()
        }
    }

    /// The worker notices the token at its next buffer and winds down.
    fn exit(&mut self) {
        self.cancel.cancel();
        self.exit = Some(StatusExit::Quit);
    }
}

impl Widget for &Status {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(
            format!(" {} Run {}/{} Status ", self.model, self.curr_run, self.repeat).bold(),
        );
        let instructions = Line::from(vec![" Quit ".into(), "<Q> ".blue().bold()]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);
        let inner = block.inner(area);
        block.render(area, buf);

        let [text_area, gauge_area] =
            Layout::vertical([Constraint::Length(2), Constraint::Length(1)]).areas(inner);

        let mut lines = vec![Line::from(vec![
            "Elapsed time: ".into(),
            self.t_begin.elapsed().as_secs().to_string().yellow(),
            " s".into(),
            " Buffers: ".into(),
            self.counter.buffers.to_string().yellow(),
            " Data rate: ".into(),
            format!("{:.2}", self.counter.recent_rate()).yellow(),
            " MiB/s ".into(),
        ])];
        if !self.last_summary.is_empty() {
            lines.push(Line::from(self.last_summary.clone().italic()));
        }
        Paragraph::new(Text::from(lines))
            .centered()
            .render(text_area, buf);

        let ratio = self.fraction.clamp(0.0, 1.0);
        Gauge::default()
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(ratio)
            .label(format!("{:.0}%", 100.0 * ratio))
            .render(gauge_area, buf);
    }
}
