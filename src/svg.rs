use crate::plot::{Axis, Line, PlotKind, PlotLayout};

const MARK_STROKE: &str = "#505050";
const MEAN_STROKE: &str = "#333";
const REGRESSION_STROKE: &str = "#aaa";
const FONT: &str = "font-family=\"sans-serif\" font-size=\"10\"";

fn line(out: &mut String, l: &Line, attrs: &str) {
    out.push_str(&format!(
        "<line x1=\"{:.2}\" y1=\"{:.2}\" x2=\"{:.2}\" y2=\"{:.2}\" {}/>",
        l.x1, l.y1, l.x2, l.y2, attrs
    ));
}

fn x_axis(out: &mut String, axis: &Axis, layout: &PlotLayout) {
    let y = layout.height - layout.margin.bottom;
    out.push_str(&format!("<g class=\"x-axis\" transform=\"translate(0,{:.2})\" {}>", y, FONT));
    for tick in &axis.ticks {
        out.push_str(&format!(
            "<g transform=\"translate({:.2},0)\"><line y2=\"6\" stroke=\"currentColor\"/><text y=\"9\" dy=\"0.71em\" text-anchor=\"middle\">{}</text></g>",
            tick.position,
            htmlize::escape_text(tick.label.as_str())
        ));
    }
    out.push_str("</g>");
}

fn y_axis(out: &mut String, axis: &Axis, layout: &PlotLayout) {
    out.push_str(&format!(
        "<g class=\"y-axis\" transform=\"translate({:.2},0)\" {}>",
        layout.margin.left, FONT
    ));
    for tick in &axis.ticks {
        out.push_str(&format!(
            "<g transform=\"translate(0,{:.2})\"><line x2=\"-6\" stroke=\"currentColor\"/><text x=\"-9\" dy=\"0.32em\" text-anchor=\"end\">{}</text></g>",
            tick.position,
            htmlize::escape_text(tick.label.as_str())
        ));
    }
    out.push_str("</g>");
}

/// Serialises a plot layout as a standalone SVG document.
pub fn render_svg(layout: &PlotLayout) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
        w = layout.width,
        h = layout.height
    ));

    out.push_str("<g class=\"grid\" stroke=\"currentColor\" stroke-opacity=\"0.1\">");
    for l in &layout.grid {
        line(&mut out, l, "");
    }
    out.push_str("</g>");

    x_axis(&mut out, &layout.x_axis, layout);
    if let Some(axis) = &layout.y_axis {
        y_axis(&mut out, axis, layout);
    }

    for l in &layout.mean_lines {
        line(&mut out, l, &format!("class=\"mean\" stroke=\"{}\"", MEAN_STROKE));
    }
    if let Some(l) = &layout.regression {
        line(&mut out, l, &format!("class=\"regression\" stroke=\"{}\"", REGRESSION_STROKE));
    }

    let class = match layout.kind {
        PlotKind::Scatter => "scatter",
        PlotKind::Beeswarm => "beeswarm",
    };
    out.push_str(&format!("<g class=\"marks {}\" stroke=\"{}\">", class, MARK_STROKE));
    for mark in &layout.marks {
        out.push_str(&format!(
            "<circle data-area=\"{}\" cx=\"{:.2}\" cy=\"{:.2}\" r=\"{}\" stroke-width=\"{}\" fill=\"{}\"><title>{}</title></circle>",
            htmlize::escape_attribute(mark.area_id.as_str()),
            mark.cx,
            mark.cy,
            mark.r,
            mark.stroke_width,
            mark.colour,
            htmlize::escape_text(mark.area_name.as_str())
        ));
    }
    out.push_str("</g></svg>");
    out
}
