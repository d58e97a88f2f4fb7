use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::warn;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame, Terminal,
};
use std::{
    io,
    sync::mpsc::Receiver,
    time::{Duration, Instant},
};

use crate::connection::ConnectionEvent;
use crate::gui::error::BenchGuiError;
use crate::session::Session;

const COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Red,
    Color::Blue,
];

struct App<'a> {
    session: &'a mut Session,
    events: Receiver<ConnectionEvent>,
    series: Vec<(String, Vec<(f64, f64)>)>,
    status: String,
}

impl<'a> App<'a> {
    fn new(session: &'a mut Session) -> Self {
        let events = session.subscribe();
        let status = format!("{:?}", session.connection().state());
        App {
            session,
            events,
            series: vec![],
            status,
        }
    }

    fn on_tick(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ConnectionEvent::StateChanged(state) => self.status = format!("{:?}", state),
                ConnectionEvent::LinkLost(reason) => self.status = format!("link lost: {}", reason),
                ConnectionEvent::Frame(_) => {}
            }
        }

        self.series = self
            .session
            .interactor()
            .buffers()
            .iter()
            .map(|b| {
                let points = b.iter().map(|s| (s.time, s.value)).collect();
                (b.name().to_string(), points)
            })
            .collect();
    }

    /// Runs the action bound to `key`. `false` when the user wants out.
    fn on_key(&mut self, key: KeyCode) -> bool {
        let interactor = self.session.interactor_mut();
        let result = match key {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('p') => interactor
                .send_parameter_experiment()
                .map(|()| "parameters sent"),
            KeyCode::Char('r') => interactor.run_experiment().map(|()| "running"),
            KeyCode::Char('s') => interactor.stop_experiment().map(|()| "stopped"),
            _ => return true,
        };

        self.status = match result {
            Ok(msg) => msg.to_string(),
            Err(e) => {
                warn!("{}", e);
                e.to_string()
            }
        };
        true
    }
}

/// Shows the data points of the session's active experiment live until the
/// user quits.
///
/// Keys: `p` sends the parameters, `r` runs, `s` stops, `q` quits.
pub fn monitor(session: &mut Session, refresh: Duration) -> Result<(), BenchGuiError> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, App::new(session), refresh);

    // restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(BenchGuiError::from)
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    app.on_tick();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.on_key(key.code) {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

/// Smallest and largest value, padded when they coincide so the axis never
/// collapses.
fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        [0.0, 1.0]
    } else if lo == hi {
        [lo - 1.0, hi + 1.0]
    } else {
        [lo, hi]
    }
}

fn labels<'a>([lo, hi]: [f64; 2]) -> Vec<Span<'a>> {
    let mid = (lo + hi) / 2.0;
    [lo, mid, hi]
        .iter()
        .map(|v| Span::from(format!("{:.2}", v)))
        .collect()
}

fn ui(f: &mut Frame, app: &App) {
    let mut constraints = vec![Constraint::Min(3); app.series.len().max(1)];
    constraints.push(Constraint::Length(1));
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(f.size());

    for (i, (name, points)) in app.series.iter().enumerate() {
        let x = bounds(points.iter().map(|p| p.0));
        let y = bounds(points.iter().map(|p| p.1));
        let chart = Chart::new(vec![Dataset::default()
            .name(name.clone())
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLORS[i % COLORS.len()]))
            .data(points)])
        .block(Block::default().title(name.clone()).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("t [s]")
                .style(Style::default().fg(Color::White))
                .bounds(x)
                .labels(labels(x)),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::White))
                .bounds(y)
                .labels(labels(y)),
        );
        f.render_widget(chart, areas[i]);
    }

    let experiment = app
        .session
        .interactor()
        .active_experiment()
        .map_or("no experiment", |d| d.name.as_str());
    let status = Line::from(vec![
        Span::styled(format!(" {} ", experiment), Style::default().fg(Color::Cyan)),
        Span::raw(format!("| {} ", app.status)),
        Span::styled(
            "| <p> parameters <r> run <s> stop <q> quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    if let Some(area) = areas.last() {
        f.render_widget(Paragraph::new(status), *area);
    }
}
