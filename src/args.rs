use clap::{Parser, Subcommand};

/// Turns spreadsheets into forms, and keeps track of who filled them.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON configuration file. See the README for the available keys.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory, optional) Where the forms, responses and rosters are stored. Setting this
    /// option overrides the directory that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub data_dir: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Infers a form from an xlsx file and registers it. Prints the new form.
    BuildSchema {
        /// (file path) The xlsx or xlsm file.
        #[clap(value_parser)]
        input: String,
        /// (default: the active sheet) The name of the worksheet to use.
        #[clap(long, value_parser)]
        sheet: Option<String>,
        /// (default: the file name) The title of the form.
        #[clap(long, value_parser)]
        title: Option<String>,
        /// (file path) A reference form in JSON format. If provided, the inferred fields are
        /// checked against it and the differences are printed.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },
    /// Lists the registered forms.
    Forms,
    /// Prints one form.
    ShowForm {
        #[clap(value_parser)]
        form: String,
    },
    /// Merges a member list (xlsx or csv) into the roster of a form.
    LoadRoster {
        #[clap(value_parser)]
        form: String,
        #[clap(value_parser)]
        members: String,
    },
    /// Submits a response.
    Submit {
        #[clap(value_parser)]
        form: String,
        /// The name of the respondent.
        #[clap(long, value_parser)]
        identity: String,
        /// (field=value, repeated) The answers.
        #[clap(short, long = "value", value_parser)]
        values: Vec<String>,
    },
    /// Lists the responses of a form.
    List {
        #[clap(value_parser)]
        form: String,
        /// Only the responses of this respondent.
        #[clap(long, value_parser)]
        identity: Option<String>,
        /// Newest responses first.
        #[clap(long, takes_value = false)]
        latest_first: bool,
    },
    /// Prints how many of the expected respondents have filled the form.
    Progress {
        #[clap(value_parser)]
        form: String,
    },
    /// Lists the expected respondents who have not filled the form yet.
    Pending {
        #[clap(value_parser)]
        form: String,
    },
    /// Replaces the answers of a response.
    Update {
        /// (form:number) The response to change.
        #[clap(value_parser)]
        record: String,
        /// (field=value, repeated) The new answers. Answers that are not given are removed.
        #[clap(short, long = "value", value_parser)]
        values: Vec<String>,
    },
    /// Deletes a response.
    Delete {
        /// (form:number) The response to delete.
        #[clap(value_parser)]
        record: String,
    },
    /// Writes the responses of a form as CSV.
    Export {
        #[clap(value_parser)]
        form: String,
        /// (file path or 'stdout') Where to write the CSV.
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },
}
