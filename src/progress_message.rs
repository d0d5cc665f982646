use std::time::Duration;

pub enum Progress {
    // uploaded a whole file. values are filepath and file size.
    Uploaded(String, u64),
    // uploaded the whole directory. values are number of files, total bytes, how long it took.
    Copied(usize, u64, Duration),
    // started running a SQL file
    Loading(String),
    // SQL file ran with exit code 0. value is how long it took.
    Loaded(String, Duration),
    // loaded all the files. values are number of files and how long the loading took.
    Finished(usize, Duration),
}
