//! SVG rendering of the resource series.
//!
//! Two stacked line charts (CPU percent and memory MB) share the elapsed-seconds
//! x axis. Output depends only on the samples, so re-rendering is byte-stable.

use crate::sampler::ResourceSeries;

const WIDTH: f64 = 800.0;
const PANEL_HEIGHT: f64 = 260.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 40.0;
const Y_TICKS: usize = 4;

struct Panel<'a> {
    title: &'a str,
    unit: &'a str,
    color: &'a str,
    points: Vec<(f64, f64)>,
}

/// Render `series` as a standalone SVG document.
pub fn render_svg(series: &ResourceSeries) -> String {
    let height = PANEL_HEIGHT * 2.0;
    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" font-family=\"sans-serif\" font-size=\"12\">\n\
         <rect width=\"{w}\" height=\"{h}\" fill=\"white\"/>\n",
        w = WIDTH,
        h = height
    );

    if series.samples.is_empty() {
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\">No resource samples recorded for pid {}</text>\n",
            WIDTH / 2.0,
            height / 2.0,
            series.pid
        ));
        svg.push_str("</svg>\n");
        return svg;
    }

    let elapsed: Vec<f64> = series
        .samples
        .iter()
        .map(|s| s.elapsed.as_secs_f64())
        .collect();
    let panels = [
        Panel {
            title: "CPU usage",
            unit: "%",
            color: "#d62728",
            points: elapsed
                .iter()
                .zip(&series.samples)
                .map(|(&x, s)| (x, s.cpu_percent))
                .collect(),
        },
        Panel {
            title: "Memory usage",
            unit: "MB",
            color: "#1f77b4",
            points: elapsed
                .iter()
                .zip(&series.samples)
                .map(|(&x, s)| (x, s.memory_mb))
                .collect(),
        },
    ];
    let x_max = elapsed.last().copied().unwrap_or(0.0).max(1.0);

    for (i, panel) in panels.iter().enumerate() {
        svg.push_str(&render_panel(panel, i as f64 * PANEL_HEIGHT, x_max));
    }
    svg.push_str("</svg>\n");
    svg
}

fn render_panel(panel: &Panel<'_>, offset_y: f64, x_max: f64) -> String {
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let top = offset_y + MARGIN_TOP;
    let bottom = top + plot_h;

    let y_max = nice_ceiling(panel.points.iter().map(|&(_, y)| y).fold(0.0, f64::max));
    let sx = |x: f64| MARGIN_LEFT + x / x_max * plot_w;
    let sy = |y: f64| bottom - y / y_max * plot_h;

    let mut out = format!(
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"14\" font-weight=\"bold\">{} ({})</text>\n",
        MARGIN_LEFT,
        offset_y + MARGIN_TOP - 12.0,
        panel.title,
        panel.unit
    );

    for tick in 0..=Y_TICKS {
        let value = y_max * tick as f64 / Y_TICKS as f64;
        let y = sy(value);
        out.push_str(&format!(
            "<line x1=\"{:.1}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#e0e0e0\"/>\n\
             <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{:.1}</text>\n",
            MARGIN_LEFT,
            MARGIN_LEFT + plot_w,
            MARGIN_LEFT - 6.0,
            y + 4.0,
            value,
            y = y
        ));
    }

    out.push_str(&format!(
        "<line x1=\"{l:.1}\" y1=\"{b:.1}\" x2=\"{r:.1}\" y2=\"{b:.1}\" stroke=\"black\"/>\n\
         <line x1=\"{l:.1}\" y1=\"{t:.1}\" x2=\"{l:.1}\" y2=\"{b:.1}\" stroke=\"black\"/>\n\
         <text x=\"{l:.1}\" y=\"{lb:.1}\">0s</text>\n\
         <text x=\"{r:.1}\" y=\"{lb:.1}\" text-anchor=\"end\">{x_max:.0}s</text>\n",
        l = MARGIN_LEFT,
        r = MARGIN_LEFT + plot_w,
        t = top,
        b = bottom,
        lb = bottom + 18.0,
        x_max = x_max
    ));

    let points: Vec<String> = panel
        .points
        .iter()
        .map(|&(x, y)| format!("{:.1},{:.1}", sx(x), sy(y)))
        .collect();
    out.push_str(&format!(
        "<polyline fill=\"none\" stroke=\"{}\" stroke-width=\"2\" points=\"{}\"/>\n",
        panel.color,
        points.join(" ")
    ));
    out
}

/// Smallest of 1, 2 or 5 times a power of ten that is >= `value`.
fn nice_ceiling(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 1.0;
    }
    let magnitude = 10f64.powi(value.log10().floor() as i32);
    [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|&candidate| candidate >= value)
        .unwrap_or(10.0 * magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kbload_core::ResourceSample;
    use std::time::Duration;

    fn series(n: u64) -> ResourceSeries {
        let mut series = ResourceSeries::empty(99, Duration::from_secs(1));
        series.samples = (0..n)
            .map(|i| ResourceSample {
                timestamp: Utc::now(),
                elapsed: Duration::from_secs(i),
                cpu_percent: (i * 7 % 23) as f64,
                memory_mb: 200.0 + i as f64,
            })
            .collect();
        series
    }

    #[test]
    fn test_nice_ceiling() {
        assert_eq!(nice_ceiling(0.0), 1.0);
        assert_eq!(nice_ceiling(7.0), 10.0);
        assert_eq!(nice_ceiling(130.0), 200.0);
        assert_eq!(nice_ceiling(450.0), 500.0);
        assert_eq!(nice_ceiling(1000.0), 1000.0);
    }

    #[test]
    fn test_renders_both_panels() {
        let svg = render_svg(&series(10));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains("CPU usage (%)"));
        assert!(svg.contains("Memory usage (MB)"));
    }

    #[test]
    fn test_render_is_stable() {
        let s = series(30);
        assert_eq!(render_svg(&s), render_svg(&s));
    }

    #[test]
    fn test_empty_series_placeholder() {
        let svg = render_svg(&ResourceSeries::empty(5, Duration::from_secs(1)));
        assert!(svg.contains("No resource samples recorded for pid 5"));
        assert!(!svg.contains("<polyline"));
    }
}
