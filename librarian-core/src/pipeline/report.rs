//! Report Synthesizer: renders a run into the final markdown document.
//!
//! Rendering reads only recorded state (no clocks, no hash-map iteration),
//! so the same run always renders to the same bytes.

use std::fmt::Write as _;
use tracing::info;

use super::claim::{Citation, Claim, ConfidenceBand, Gap, VerificationStatus};
use super::run::PipelineRun;
use super::scoring::{ScoringMode, ScoringRubric};
use crate::error::PipelineError;

/// Section headings, in rendering order.
pub const SECTIONS: [&str; 7] = [
    "Process Summary",
    "Research Synthesis",
    "Contradictory Evidence",
    "Research Gaps",
    "Methodological Strengths and Weaknesses",
    "Future Research Priorities",
    "Limitations",
];

/// Renders and finalizes pipeline reports.
#[derive(Debug, Clone)]
pub struct ReportSynthesizer {
    rubric_version: String,
    mode: ScoringMode,
}

impl Default for ReportSynthesizer {
    fn default() -> Self {
        Self::new(&ScoringRubric::default(), ScoringMode::default())
    }
}

impl ReportSynthesizer {
    pub fn new(rubric: &ScoringRubric, mode: ScoringMode) -> Self {
        Self {
            rubric_version: rubric.version.clone(),
            mode,
        }
    }

    /// Render the report, finalize every claim, and store the report on the run.
    pub fn finalize(&self, run: &mut PipelineRun) -> Result<String, PipelineError> {
        if run.is_finalized() {
            return Err(PipelineError::AlreadyFinalized { run_id: run.id });
        }
        let report = self.render(run);
        for claim in run.claims.iter_mut() {
            claim.finalized = true;
        }
        run.set_final_report(report.clone())?;
        info!(run_id = %run.id, claims = run.claims.len(), bytes = report.len(), "Report finalized");
        Ok(report)
    }

    /// Render the markdown report without modifying the run.
    pub fn render(&self, run: &PipelineRun) -> String {
        let mut out = format!("# Research Report: {}\n", run.research_question());
        self.process_summary(&mut out, run);
        self.research_synthesis(&mut out, run);
        self.contradictory_evidence(&mut out, run);
        self.research_gaps(&mut out, run);
        self.methodology(&mut out, run);
        self.priorities(&mut out, run);
        self.limitations(&mut out, run);
        out
    }

    fn process_summary(&self, out: &mut String, run: &PipelineRun) {
        section(out, 0);
        let _ = writeln!(out, "- Run: `{}`", run.id);
        let _ = writeln!(out, "- Stages completed: {} of 6", run.stage_records.len());
        let usage = run.total_usage();
        let _ = writeln!(
            out,
            "- Tokens: {} prompt, {} completion; estimated cost ${:.4}",
            usage.prompt_tokens,
            usage.completion_tokens,
            run.total_cost().total()
        );
        let checked: usize = run.claims.iter().map(|c| c.all_citations().count()).sum();
        let _ = writeln!(
            out,
            "- Claims: {}; citations checked by red team: {}; findings: {}",
            run.claims.len(),
            checked,
            run.red_team_findings.len()
        );
        out.push('\n');
        out.push_str("| # | Stage | Model | Attempts | Tokens | Search queries |\n");
        out.push_str("|---|-------|-------|----------|--------|----------------|\n");
        for record in run.stage_records.records() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                record.stage_name.ordinal(),
                record.stage_name.title(),
                record.model_identifier,
                record.attempts,
                record.token_usage.total(),
                record.search_queries.len()
            );
        }
    }

    fn research_synthesis(&self, out: &mut String, run: &PipelineRun) {
        section(out, 1);
        if run.claims.is_empty() {
            out.push_str("\nNo claims were identified.\n");
            return;
        }
        let (mut convergent, mut weak): (Vec<&Claim>, Vec<&Claim>) = run
            .claims
            .iter()
            .partition(|c| band_of(c) >= ConfidenceBand::Medium);
        let by_score = |a: &&Claim, b: &&Claim| {
            b.confidence_score
                .cmp(&a.confidence_score)
                .then_with(|| a.id.cmp(&b.id))
        };
        convergent.sort_by(by_score);
        weak.sort_by(by_score);

        out.push_str("\n### Convergent Findings\n");
        if convergent.is_empty() {
            out.push_str("\nNo finding reached MEDIUM confidence.\n");
        }
        for claim in convergent {
            render_claim(out, claim);
        }
        if !weak.is_empty() {
            out.push_str("\n### Weakly Supported Findings\n");
            for claim in weak {
                render_claim(out, claim);
            }
        }
    }

    fn contradictory_evidence(&self, out: &mut String, run: &PipelineRun) {
        section(out, 2);
        let mut any = false;
        for claim in run.claims.iter() {
            if claim.contradicting_citations.is_empty() {
                continue;
            }
            any = true;
            let _ = writeln!(out, "\n**{}**: {}", claim.id, claim.text);
            for c in &claim.contradicting_citations {
                let _ = writeln!(out, "- {}", citation_line(c));
            }
        }
        if !run.unattached_counter_evidence.is_empty() {
            any = true;
            out.push_str("\n**Not matched to a claim**\n");
            for c in &run.unattached_counter_evidence {
                let _ = writeln!(out, "- {}", citation_line(c));
            }
        }

        let disputed: Vec<(&Claim, &Citation)> = run
            .claims
            .iter()
            .flat_map(|claim| claim.disputed_citations().map(move |c| (claim, c)))
            .collect();
        if !disputed.is_empty() {
            any = true;
            out.push_str("\n### Disputed Citations\n");
            for (claim, c) in disputed {
                let _ = writeln!(
                    out,
                    "- {} (cited for {}): could not be located in the search index",
                    c.full_citation, claim.id
                );
            }
        }

        let corrected: Vec<(&Claim, &Citation)> = run
            .claims
            .iter()
            .flat_map(|claim| {
                claim
                    .all_citations()
                    .filter(|c| c.correction.is_some())
                    .map(move |c| (claim, c))
            })
            .collect();
        if !corrected.is_empty() {
            any = true;
            out.push_str("\n### Corrected Citations\n");
            for (claim, c) in corrected {
                let _ = writeln!(
                    out,
                    "- {} (cited for {}): {}",
                    c.label(),
                    claim.id,
                    c.correction.as_deref().unwrap_or_default()
                );
            }
        }

        if !any {
            out.push_str("\nNo contradictory evidence was identified.\n");
        }
    }

    fn research_gaps(&self, out: &mut String, run: &PipelineRun) {
        section(out, 3);
        let claim_gaps: Vec<(&Claim, &Gap)> = run
            .claims
            .iter()
            .flat_map(|claim| claim.annotations.iter().map(move |g| (claim, g)))
            .collect();
        if run.run_gaps.is_empty() && claim_gaps.is_empty() {
            out.push_str("\nNo structural gaps were reported.\n");
            return;
        }
        for gap in &run.run_gaps {
            let _ = writeln!(out, "- {}", gap_line(gap));
        }
        for (claim, gap) in claim_gaps {
            let _ = writeln!(out, "- {} ({})", gap_line(gap), claim.id);
        }
    }

    fn methodology(&self, out: &mut String, run: &PipelineRun) {
        section(out, 4);
        let notes = &run.synthesis_notes;
        out.push_str("\n### Strengths\n");
        bullet_list(out, &notes.methodological_strengths, "None reported.");
        out.push_str("\n### Weaknesses\n");
        bullet_list(out, &notes.methodological_weaknesses, "None reported.");
    }

    fn priorities(&self, out: &mut String, run: &PipelineRun) {
        section(out, 5);
        let mut items = run.synthesis_notes.future_research_priorities.clone();
        let recommended = run
            .run_gaps
            .iter()
            .chain(run.claims.iter().flat_map(|c| c.annotations.iter()))
            .filter_map(|g| g.recommended_study.clone());
        for study in recommended {
            if !items.iter().any(|i| i.eq_ignore_ascii_case(&study)) {
                items.push(study);
            }
        }
        if items.is_empty() {
            out.push_str("\nNone identified.\n");
            return;
        }
        for (i, item) in items.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, item);
        }
    }

    fn limitations(&self, out: &mut String, run: &PipelineRun) {
        section(out, 6);
        let mode = match self.mode {
            ScoringMode::Rubric => "deterministic rubric arithmetic",
            ScoringMode::Delegated => "the synthesis model's rubric application",
        };
        let _ = writeln!(
            out,
            "- Confidence scores follow rubric v{} using {mode}; bands are advisory.",
            self.rubric_version
        );
        out.push_str("- Strategic guidance (stage 1) steered the search and was not treated as evidence.\n");
        out.push_str(
            "- Evidence was limited to records returned by the configured search provider and the model's reports of them.\n",
        );
        let unverified = run
            .claims
            .iter()
            .flat_map(|c| c.all_citations())
            .filter(|c| c.verification_status == VerificationStatus::Unverified)
            .count();
        if unverified > 0 {
            let _ = writeln!(out, "- {unverified} citation(s) were not verified by the red team.");
        }
        let disputed: usize = run.claims.iter().map(|c| c.disputed_citations().count()).sum();
        if disputed > 0 {
            let _ = writeln!(
                out,
                "- {disputed} citation(s) could not be located and may not exist as cited."
            );
        }
        if run.claims.iter().any(|c| c.annotations.is_empty()) && !run.run_gaps.is_empty() {
            out.push_str("- Run-level gaps apply to every finding above.\n");
        }
    }
}

fn section(out: &mut String, index: usize) {
    let _ = writeln!(out, "\n## {}\n", SECTIONS[index]);
}

fn band_of(claim: &Claim) -> ConfidenceBand {
    claim
        .band
        .or_else(|| claim.confidence_score.map(ConfidenceBand::from_score))
        .unwrap_or(ConfidenceBand::Low)
}

fn render_claim(out: &mut String, claim: &Claim) {
    let _ = writeln!(out, "\n#### {}: {}\n", claim.id, claim.text);
    match claim.confidence_score {
        Some(score) => {
            let _ = write!(out, "**Confidence:** {} ({score}/10)", band_of(claim));
            if let Some(pre) = claim.pre_validation_score
                && pre != score
            {
                let _ = write!(out, ", {pre}/10 before red-team validation");
            }
            out.push('\n');
        }
        None => out.push_str("**Confidence:** not scored\n"),
    }
    if !claim.confidence_rationale.is_empty() {
        let _ = writeln!(out, "\n**Rationale:** {}", claim.confidence_rationale);
    }

    out.push_str("\n**Supporting evidence:**\n");
    if claim.supporting_citations.is_empty() {
        out.push_str("- None cited.\n");
    }
    for c in &claim.supporting_citations {
        let _ = writeln!(out, "- {}", citation_line(c));
    }

    out.push_str("\n**Counter-evidence:**\n");
    if claim.contradicting_citations.is_empty() {
        out.push_str("- None identified.\n");
    }
    for c in &claim.contradicting_citations {
        let _ = writeln!(out, "- {}", citation_line(c));
    }

    if !claim.annotations.is_empty() {
        out.push_str("\n**Completeness gaps:**\n");
        for gap in &claim.annotations {
            let _ = writeln!(out, "- {}", gap_line(gap));
        }
    }
    if !claim.verification_notes.is_empty() {
        out.push_str("\n**Verification notes:**\n");
        for note in &claim.verification_notes {
            let _ = writeln!(out, "- {note}");
        }
    }
    if let Some(assessment) = &claim.assessment
        && !assessment.is_empty()
    {
        let _ = writeln!(out, "\n**Assessment:** {assessment}");
    }
}

fn citation_line(c: &Citation) -> String {
    let mut line = format!("{} [{}]", c.full_citation, c.verification_status);
    if !c.key_finding.is_empty() {
        let _ = write!(line, " Finding: {}", c.key_finding);
    }
    if let Some(es) = &c.effect_size {
        let _ = write!(line, " ({es})");
    }
    if let Some(n) = c.sample_size {
        let _ = write!(line, " N = {n}.");
    }
    if !c.methodology_summary.is_empty() {
        let _ = write!(line, " Method: {}", c.methodology_summary);
    }
    if let Some(correction) = &c.correction {
        let _ = write!(line, " Correction: {correction}");
    }
    line
}

fn gap_line(gap: &Gap) -> String {
    let mut line = format!("**{}**: {}", capitalize(&gap.dimension.to_string()), gap.description);
    if let Some(study) = &gap.recommended_study {
        let _ = write!(line, " Recommended study: {study}");
    }
    line
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn bullet_list(out: &mut String, items: &[String], empty: &str) {
    if items.is_empty() {
        let _ = writeln!(out, "- {empty}");
    }
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}
